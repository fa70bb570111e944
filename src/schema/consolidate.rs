use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::duck::{quote_ident, Store};
use crate::schema::names::{canonical_column, year_from_table_name, YEAR_COLUMN};

/// A survey metadata component whose per-year tables are unioned into a
/// single `<prefix>_all` view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataComponent {
    /// Table-name prefix, immediately followed by a 2-digit year.
    pub prefix: &'static str,
}

/// The metadata components consolidated across years. Survey data tables stay
/// per-year; only the dictionaries and catalogs get unioned.
pub const METADATA_COMPONENTS: &[MetadataComponent] = &[
    MetadataComponent { prefix: "tables" },
    MetadataComponent { prefix: "vartable" },
    MetadataComponent { prefix: "valuesets" },
];

impl MetadataComponent {
    pub fn view_name(&self) -> String {
        format!("{}_all", self.prefix)
    }

    /// True when `table` is one of this component's per-year tables: the
    /// prefix, a 2-digit year, then nothing or an underscore-led suffix.
    pub fn matches(&self, table: &str) -> bool {
        let Some(rest) = table.strip_prefix(self.prefix) else {
            return false;
        };
        let bytes = rest.as_bytes();
        if bytes.len() < 2 || !bytes[0].is_ascii_digit() || !bytes[1].is_ascii_digit() {
            return false;
        }
        matches!(bytes.get(2), None | Some(b'_'))
    }
}

/// What a rebuild produced, for logging and orchestration summaries.
#[derive(Debug, Clone)]
pub struct ConsolidationReport {
    pub component: String,
    pub view: String,
    pub columns: Vec<String>,
    pub source_tables: Vec<String>,
}

/// One column of the consolidated view: its canonical name, the declared
/// type it first appeared with, and whether type drift across years forces
/// it down to VARCHAR.
#[derive(Debug)]
struct ViewColumn {
    canonical: String,
    declared: String,
    cast_to_text: bool,
}

/// Rebuild the union view for one component from whatever per-year tables
/// currently exist. Returns `Ok(None)` when the component has no source
/// tables yet.
pub fn consolidate_component(
    store: &Store,
    component: MetadataComponent,
) -> Result<Option<ConsolidationReport>> {
    // 1) find this component's per-year tables, oldest first
    let mut tables: Vec<String> = store
        .table_names()?
        .into_iter()
        .filter(|name| component.matches(name))
        .collect();
    if tables.is_empty() {
        debug!(component = component.prefix, "no source tables; skipping view");
        return Ok(None);
    }
    tables.sort_by_key(|name| (year_from_table_name(name), name.clone()));

    // 2) pass 1: union of canonical columns in first-seen order, plus each
    //    table's own canonical -> actual name map
    let mut view_columns: Vec<ViewColumn> = Vec::new();
    let mut locals: Vec<HashMap<String, String>> = Vec::with_capacity(tables.len());
    for table in &tables {
        let mut local: HashMap<String, String> = HashMap::new();
        for (actual, declared) in store.table_columns(table)? {
            let canonical = canonical_column(&actual);
            if canonical == YEAR_COLUMN {
                // folded into the literal year discriminator appended in pass 2
                continue;
            }
            if local.contains_key(&canonical) {
                warn!(
                    table = %table,
                    column = %canonical,
                    "two columns normalize to the same name; keeping the first"
                );
                continue;
            }
            match view_columns.iter_mut().find(|c| c.canonical == canonical) {
                None => view_columns.push(ViewColumn {
                    canonical: canonical.clone(),
                    declared,
                    cast_to_text: false,
                }),
                Some(existing) => {
                    if !existing.cast_to_text && existing.declared != declared {
                        warn!(
                            table = %table,
                            column = %canonical,
                            first_seen = %existing.declared,
                            conflicting = %declared,
                            "column type drifts across years; casting to VARCHAR in the union"
                        );
                        existing.cast_to_text = true;
                    }
                }
            }
            local.insert(canonical, actual);
        }
        locals.push(local);
    }

    // 3) pass 2: padded projections glued with positional UNION ALL
    let view = component.view_name();
    let body = union_body(&tables, &locals, &view_columns, false)?;
    if let Err(err) = store.create_or_replace_view(&view, &body) {
        warn!(
            view = %view,
            error = %err,
            "store rejected the union; rebuilding with every column cast to VARCHAR"
        );
        let body = union_body(&tables, &locals, &view_columns, true)?;
        store.create_or_replace_view(&view, &body)?;
    }

    let columns: Vec<String> = view_columns
        .iter()
        .map(|c| c.canonical.clone())
        .chain(std::iter::once(YEAR_COLUMN.to_string()))
        .collect();
    info!(
        view = %view,
        sources = tables.len(),
        columns = columns.len(),
        "rebuilt consolidated view"
    );
    Ok(Some(ConsolidationReport {
        component: component.prefix.to_string(),
        view,
        columns,
        source_tables: tables,
    }))
}

/// Rebuild every metadata component's view. Per-component failures are
/// collected as strings rather than raised, so one bad component cannot
/// block the rest of the batch.
pub fn consolidate_all(store: &Store) -> (Vec<ConsolidationReport>, Vec<String>) {
    let mut reports = Vec::new();
    let mut errors = Vec::new();
    for component in METADATA_COMPONENTS {
        match consolidate_component(store, *component) {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(err) => {
                let msg = format!("{}: {err:#}", component.prefix);
                warn!(error = %msg, "consolidation failed");
                errors.push(msg);
            }
        }
    }
    (reports, errors)
}

/// One `SELECT` per source table over the full column superset, each padded
/// with typed NULLs for the columns that table lacks and finished with the
/// table's own year as a literal, joined by positional `UNION ALL`.
fn union_body(
    tables: &[String],
    locals: &[HashMap<String, String>],
    view_columns: &[ViewColumn],
    cast_everything: bool,
) -> Result<String> {
    let mut selects = Vec::with_capacity(tables.len());
    for (table, local) in tables.iter().zip(locals) {
        let year = year_from_table_name(table)
            .with_context(|| format!("{table}: cannot derive a year from the table name"))?;

        let mut parts = Vec::with_capacity(view_columns.len() + 1);
        for col in view_columns {
            let target = quote_ident(&col.canonical);
            let cast = cast_everything || col.cast_to_text;
            let part = match local.get(&col.canonical) {
                Some(actual) => {
                    let source = quote_ident(actual);
                    if cast {
                        format!("CAST({source} AS VARCHAR) AS {target}")
                    } else if actual == &col.canonical {
                        source
                    } else {
                        format!("{source} AS {target}")
                    }
                }
                None => {
                    let ty = if cast { "VARCHAR" } else { col.declared.as_str() };
                    format!("CAST(NULL AS {ty}) AS {target}")
                }
            };
            parts.push(part);
        }
        parts.push(format!(
            "CAST({year} AS BIGINT) AS {}",
            quote_ident(YEAR_COLUMN)
        ));
        selects.push(format!(
            "SELECT {} FROM {}",
            parts.join(", "),
            quote_ident(table)
        ));
    }
    Ok(selects.join("\nUNION ALL\n"))
}
