pub mod archive;
pub mod coerce;
pub mod parse;
pub mod sanitize;
pub mod workbook;

pub use coerce::{ImportOptions, SentinelPolicy};

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::duck::{CellValue, ColumnType, Store, TypedTable};
use crate::process::parse::ParsedTable;
use crate::schema::names::{canonical_table, year_from_table_name, IDENTIFIER_COLUMN, YEAR_COLUMN};

/// Facts about one imported table, reported up to the run summary.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub table: String,
    pub rows: usize,
    pub duplicates_dropped: usize,
    pub columns: Vec<(String, ColumnType)>,
}

/// Import a survey data file (flat or zipped delimited payload) into
/// `table_name`, fully replacing any prior content of that table.
#[tracing::instrument(level = "info", skip(store, path, options), fields(path = %path.display()))]
pub fn import_file(
    store: &Store,
    path: &Path,
    table_name: &str,
    options: &ImportOptions,
) -> Result<ImportOutcome> {
    let table = canonical_table(table_name);

    // 1) Locate and read the tabular payload.
    let (label, bytes) = archive::read_tabular_payload(path)?;

    // 2) Parse defensively, then run the shared import tail.
    let parsed = parse::read_delimited(&bytes, &label)?;
    finish_import(store, &table, parsed, options)
}

/// Import a dictionary workbook. Each recognized role sheet lands in
/// its own table (`vartable<yy>_<component>`, `valuesets<yy>_<component>`);
/// a workbook with no recognized sheets imports nothing, which is data
/// absence rather than an error.
#[tracing::instrument(level = "info", skip(store, path, options), fields(path = %path.display()))]
pub fn import_dictionary(
    store: &Store,
    path: &Path,
    year: i32,
    survey_component: &str,
    options: &ImportOptions,
) -> Result<Vec<ImportOutcome>> {
    let (label, bytes) = archive::read_workbook_payload(path)?;
    let sheets = workbook::read_dictionary(bytes, &label)?;
    if sheets.is_empty() {
        info!(workbook = %label, "no recognized dictionary sheets");
        return Ok(Vec::new());
    }

    let mut outcomes = Vec::with_capacity(sheets.len());
    for (role, parsed) in sheets {
        let table = role.table_name(year, survey_component);
        outcomes.push(finish_import(store, &table, parsed, options)?);
    }
    Ok(outcomes)
}

/// Shared tail of both import paths: coerce, guarantee the year
/// column, persist with one aggressive-sanitize retry if the store
/// rejects the write on an encoding condition.
fn finish_import(
    store: &Store,
    table: &str,
    parsed: ParsedTable,
    options: &ImportOptions,
) -> Result<ImportOutcome> {
    let duplicates_dropped = parsed.duplicates_dropped;
    if duplicates_dropped > 0 {
        warn!(table = %table, dropped = duplicates_dropped, "dropped exact-duplicate rows");
    }

    // 3) Coerce cells to storage types.
    let mut typed = coerce::coerce_table(parsed, &options.sentinels);

    // 4) Every stored table carries a year column.
    inject_year(&mut typed, table)?;

    // 5) Persist.
    if let Err(err) = store.replace_table(table, &typed) {
        if !is_encoding_rejection(&err) {
            return Err(err);
        }
        warn!(table = %table, error = %err, "store rejected write; retrying with printable-only text");
        force_printable(&mut typed);
        store
            .replace_table(table, &typed)
            .with_context(|| format!("persisting {table} after aggressive sanitize"))?;
    }

    let outcome = ImportOutcome {
        table: table.to_string(),
        rows: typed.rows.len(),
        duplicates_dropped,
        columns: typed
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.ty))
            .collect(),
    };
    info!(
        table = %table,
        rows = outcome.rows,
        columns = outcome.columns.len(),
        "imported table"
    );
    Ok(outcome)
}

/// When the payload carries no year column, derive one from the table
/// name and insert it right after the identifier column (or first when
/// the identifier is absent). A payload that already has a year column
/// keeps it untouched.
fn inject_year(table: &mut TypedTable, table_name: &str) -> Result<()> {
    if table.column_index(YEAR_COLUMN).is_some() {
        return Ok(());
    }
    let year = year_from_table_name(table_name).with_context(|| {
        format!("{table_name}: table name carries no year token and the payload has no year column")
    })?;
    let at = table
        .column_index(IDENTIFIER_COLUMN)
        .map(|i| i + 1)
        .unwrap_or(0);
    table.insert_const_column(at, YEAR_COLUMN, ColumnType::Integer, CellValue::Int(year as i64));
    Ok(())
}

/// Store errors that look like text-encoding rejections rather than
/// structural failures.
fn is_encoding_rejection(err: &anyhow::Error) -> bool {
    let text = format!("{err:#}").to_lowercase();
    text.contains("utf") || text.contains("unicode") || text.contains("encod")
}

fn force_printable(table: &mut TypedTable) {
    for row in &mut table.rows {
        for cell in row.iter_mut() {
            if let CellValue::Text(s) = cell {
                let scrubbed = sanitize::printable_only(s);
                *cell = if scrubbed.is_empty() {
                    CellValue::Null
                } else {
                    CellValue::Text(scrubbed)
                };
            }
        }
    }
}
