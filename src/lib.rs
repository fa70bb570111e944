pub mod duck;
pub mod fetch;
pub mod process;
pub mod schema;
pub mod source;
pub mod update;

pub use duck::Store;
pub use source::{FileKind, FileLister, ManifestLister, SourceFile};
pub use update::{pending_files, run_update, UpdateOptions, UpdateRun, YearSummary};
