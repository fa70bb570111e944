pub mod consolidate;
pub mod names;

pub use consolidate::{
    consolidate_all, consolidate_component, ConsolidationReport, MetadataComponent,
    METADATA_COMPONENTS,
};
pub use names::{canonical_column, canonical_table, year_from_table_name};
