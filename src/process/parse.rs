use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::schema::names::canonical_column;

/// Parsed tabular payload: canonical headers plus raw string cells.
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Exact-duplicate rows dropped during the read (first kept).
    pub duplicates_dropped: usize,
}

/// Read a delimited payload defensively.
///
/// Decode attempts run in order: strict UTF-8, then Windows-1252 (the
/// usual culprit in older collection years), then a final pass with
/// every non-printable byte stripped. The first attempt that parses
/// wins; fallbacks are logged so noisy years stand out.
pub fn read_delimited(bytes: &[u8], label: &str) -> Result<ParsedTable> {
    // 1) Strict UTF-8.
    match std::str::from_utf8(bytes) {
        Ok(text) => match parse_text(text) {
            Ok(table) => return Ok(table),
            Err(e) => warn!(file = %label, error = %e, "utf-8 parse failed"),
        },
        Err(e) => debug!(file = %label, error = %e, "payload is not valid utf-8"),
    }

    // 2) Windows-1252.
    let decoded = decode_windows_1252(bytes);
    match parse_text(&decoded) {
        Ok(table) => {
            warn!(file = %label, "decoded as windows-1252");
            return Ok(table);
        }
        Err(e) => warn!(file = %label, error = %e, "windows-1252 parse failed"),
    }

    // 3) Strip everything non-printable and try once more.
    let stripped = strip_unprintable(bytes);
    match parse_text(&stripped) {
        Ok(table) => {
            warn!(file = %label, "parsed after stripping non-printable bytes");
            Ok(table)
        }
        Err(e) => {
            Err(e).with_context(|| format!("{label}: unparseable after all encoding fallbacks"))
        }
    }
}

/// Assemble a table from cells extracted elsewhere (workbook sheets),
/// applying the same header canonicalization and duplicate-row policy
/// as the delimited reader.
pub fn table_from_cells(header_cells: &[String], data_rows: Vec<Vec<String>>) -> ParsedTable {
    let headers = disambiguate_headers(header_cells.iter().map(|s| s.as_str()));
    finish_table(headers, data_rows)
}

fn parse_text(text: &str) -> Result<ParsedTable> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(Cursor::new(text.as_bytes()));

    let mut records = rdr.records();
    let header_record = match records.next() {
        Some(r) => r.context("reading header row")?,
        None => bail!("payload contains no rows"),
    };
    let headers = disambiguate_headers(header_record.iter());

    let mut rows = Vec::new();
    for result in records {
        let record = result.context("parsing record")?;
        rows.push(record.iter().map(|s| s.to_string()).collect());
    }
    Ok(finish_table(headers, rows))
}

/// Canonicalize headers; empty cells get positional names and repeated
/// names get positional suffixes so every column stays addressable.
fn disambiguate_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::new();
    for (i, cell) in raw.enumerate() {
        let mut name = canonical_column(cell);
        if name.is_empty() {
            name = format!("col{}", i + 1);
        }
        let n = counts.entry(name.clone()).or_insert(0);
        *n += 1;
        if *n > 1 {
            name = format!("{name}_{n}");
        }
        out.push(name);
    }
    out
}

/// Pad/truncate rows to header width and drop exact duplicates,
/// keeping the first occurrence.
fn finish_table(headers: Vec<String>, rows: Vec<Vec<String>>) -> ParsedTable {
    let width = headers.len();
    let mut seen: HashSet<Vec<String>> = HashSet::with_capacity(rows.len());
    let mut kept = Vec::with_capacity(rows.len());
    let mut dropped = 0usize;

    for mut row in rows {
        row.resize(width, String::new());
        if seen.insert(row.clone()) {
            kept.push(row);
        } else {
            dropped += 1;
        }
    }

    ParsedTable {
        headers,
        rows: kept,
        duplicates_dropped: dropped,
    }
}

fn decode_windows_1252(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| windows_1252_char(b)).collect()
}

/// The 0x80..0x9F block differs from Latin-1; everything else maps
/// straight through. Undefined positions pass through unchanged and
/// get scrubbed later with the other control characters.
fn windows_1252_char(b: u8) -> char {
    match b {
        0x80 => '\u{20ac}',
        0x82 => '\u{201a}',
        0x83 => '\u{0192}',
        0x84 => '\u{201e}',
        0x85 => '\u{2026}',
        0x86 => '\u{2020}',
        0x87 => '\u{2021}',
        0x88 => '\u{02c6}',
        0x89 => '\u{2030}',
        0x8a => '\u{0160}',
        0x8b => '\u{2039}',
        0x8c => '\u{0152}',
        0x8e => '\u{017d}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201c}',
        0x94 => '\u{201d}',
        0x95 => '\u{2022}',
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x98 => '\u{02dc}',
        0x99 => '\u{2122}',
        0x9a => '\u{0161}',
        0x9b => '\u{203a}',
        0x9c => '\u{0153}',
        0x9e => '\u{017e}',
        0x9f => '\u{0178}',
        other => other as char,
    }
}

/// Keep printable ASCII plus the bytes that carry row structure.
fn strip_unprintable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .copied()
        .filter(|b| matches!(b, 0x20..=0x7e | b'\n' | b'\r' | b'\t'))
        .map(|b| b as char)
        .collect()
}
