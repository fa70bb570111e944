use tracing::debug;

use crate::duck::{CellValue, ColumnType, TypedColumn, TypedTable};
use crate::process::parse::ParsedTable;
use crate::process::sanitize;
use crate::schema::names::{is_coded_column, IDENTIFIER_COLUMN, YEAR_COLUMN};

/// Which numeric values are read as missing-data markers and stored
/// as NULL. Identifier and year columns are never touched.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SentinelPolicy {
    /// Every negative numeric value is a marker. This is the blanket
    /// historical rule; collections that carry real negative measures
    /// should pick one of the other policies.
    #[default]
    AllNegatives,
    /// Only the listed codes are markers.
    Codes(Vec<i64>),
    /// Store all numeric values as-is.
    Keep,
}

impl SentinelPolicy {
    fn matches_int(&self, v: i64) -> bool {
        match self {
            SentinelPolicy::AllNegatives => v < 0,
            SentinelPolicy::Codes(codes) => codes.contains(&v),
            SentinelPolicy::Keep => false,
        }
    }

    fn matches_float(&self, v: f64) -> bool {
        match self {
            SentinelPolicy::AllNegatives => v < 0.0,
            SentinelPolicy::Codes(codes) => v.fract() == 0.0 && codes.contains(&(v as i64)),
            SentinelPolicy::Keep => false,
        }
    }
}

/// Importer knobs. `Default` gives the historical behavior.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub sentinels: SentinelPolicy,
}

/// Coerce parsed string cells into typed columns.
///
/// Per column: all-integral values promote to BIGINT, all-numeric to
/// DOUBLE, anything else stays text. The identifier column is forced
/// integral whenever every value is int-like (whole floats such as
/// "100654.0" count), and coded-suffix columns are forced integral
/// unconditionally. Empty and unconvertible cells become NULL.
///
/// Rows are squared to the header width: short rows pad with NULL,
/// cells past the last header are dropped.
pub fn coerce_table(parsed: ParsedTable, policy: &SentinelPolicy) -> TypedTable {
    let ParsedTable { headers, rows, .. } = parsed;

    // 1) Decide a storage type per column.
    let types: Vec<ColumnType> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| column_type(name, idx, &rows))
        .collect();

    // Sentinel nulling never applies to the key columns.
    let protected: Vec<bool> = headers
        .iter()
        .map(|name| name == IDENTIFIER_COLUMN || name == YEAR_COLUMN)
        .collect();

    // 2) Convert every cell, squaring ragged rows to the header width.
    let mut lossy: Vec<usize> = vec![0; headers.len()];
    let out_rows: Vec<Vec<CellValue>> = rows
        .into_iter()
        .map(|row| {
            (0..headers.len())
                .map(|idx| {
                    let raw = row.get(idx).map(String::as_str).unwrap_or("");
                    let cell = convert_cell(raw, types[idx], protected[idx], policy);
                    if matches!(cell, CellValue::Null) && !raw.trim().is_empty() {
                        lossy[idx] += 1;
                    }
                    cell
                })
                .collect()
        })
        .collect();

    for (idx, count) in lossy.iter().enumerate() {
        if *count > 0 {
            debug!(column = %headers[idx], nulled = count, "cells nulled during coercion");
        }
    }

    let columns = headers
        .into_iter()
        .zip(types)
        .map(|(name, ty)| TypedColumn { name, ty })
        .collect();

    TypedTable {
        columns,
        rows: out_rows,
    }
}

fn column_type(name: &str, idx: usize, rows: &[Vec<String>]) -> ColumnType {
    // Identifier column: integral when every value is int-like.
    if name == IDENTIFIER_COLUMN {
        let int_like = rows.iter().all(|row| {
            let cell = row.get(idx).map(|s| s.trim()).unwrap_or("");
            cell.is_empty() || parse_int_like(cell).is_some()
        });
        return if int_like {
            ColumnType::Integer
        } else {
            ColumnType::Text
        };
    }

    // Coded-categorical columns are stored integral regardless of content.
    if is_coded_column(name) {
        return ColumnType::Integer;
    }

    let mut all_int = true;
    let mut all_num = true;
    let mut saw_value = false;
    for row in rows {
        let cell = row.get(idx).map(|s| s.trim()).unwrap_or("");
        if cell.is_empty() {
            continue;
        }
        saw_value = true;
        if cell.parse::<i64>().is_err() {
            all_int = false;
            if cell.parse::<f64>().is_err() {
                all_num = false;
                break;
            }
        }
    }

    if !saw_value {
        ColumnType::Text
    } else if all_int {
        ColumnType::Integer
    } else if all_num {
        ColumnType::Float
    } else {
        ColumnType::Text
    }
}

fn convert_cell(raw: &str, ty: ColumnType, protected: bool, policy: &SentinelPolicy) -> CellValue {
    let cell = raw.trim();
    if cell.is_empty() {
        return CellValue::Null;
    }
    match ty {
        ColumnType::Integer => match parse_int_like(cell) {
            Some(v) if !protected && policy.matches_int(v) => CellValue::Null,
            Some(v) => CellValue::Int(v),
            None => CellValue::Null,
        },
        ColumnType::Float => match cell.parse::<f64>() {
            Ok(v) if !protected && policy.matches_float(v) => CellValue::Null,
            Ok(v) => CellValue::Float(v),
            Err(_) => CellValue::Null,
        },
        ColumnType::Text => {
            let cleaned = sanitize::clean_text(cell);
            if cleaned.is_empty() {
                CellValue::Null
            } else {
                CellValue::Text(cleaned)
            }
        }
    }
}

/// Parse an integer, accepting whole floats ("100654.0" → 100654).
fn parse_int_like(s: &str) -> Option<i64> {
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let f: f64 = s.parse().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(f as i64)
    } else {
        None
    }
}
