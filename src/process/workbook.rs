use anyhow::{Context, Result};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::process::parse::{self, ParsedTable};
use crate::schema::names::canonical_table;

/// Dictionary workbook sheets that carry importable data. Anything
/// else in the workbook (descriptions, changelogs) is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetRole {
    /// The variable list: one row per column of the survey file.
    VarList,
    /// Value/frequency labels: one row per coded value.
    Frequencies,
}

impl SheetRole {
    /// Recognize a role from a sheet tab name, case-insensitively.
    pub fn from_sheet_name(name: &str) -> Option<SheetRole> {
        match name.trim().to_lowercase().as_str() {
            "varlist" => Some(SheetRole::VarList),
            "frequencies" => Some(SheetRole::Frequencies),
            _ => None,
        }
    }

    pub fn table_prefix(self) -> &'static str {
        match self {
            SheetRole::VarList => "vartable",
            SheetRole::Frequencies => "valuesets",
        }
    }

    /// Target table for this role, e.g. `vartable04_hd`.
    pub fn table_name(self, year: i32, component: &str) -> String {
        canonical_table(&format!(
            "{}{:02}_{}",
            self.table_prefix(),
            year.rem_euclid(100),
            component
        ))
    }
}

/// Pull the recognized role sheets out of a dictionary workbook.
///
/// A workbook with no recognized sheets yields an empty list; that is
/// data absence, not an error. Sheet cells come back as strings and go
/// through the same header/duplicate policies as delimited payloads.
pub fn read_dictionary(bytes: Vec<u8>, label: &str) -> Result<Vec<(SheetRole, ParsedTable)>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .with_context(|| format!("opening workbook {label}"))?;

    let sheet_names = workbook.sheet_names();
    let mut out: Vec<(SheetRole, ParsedTable)> = Vec::new();

    for sheet_name in &sheet_names {
        let role = match SheetRole::from_sheet_name(sheet_name) {
            Some(r) => r,
            None => {
                debug!(workbook = %label, sheet = %sheet_name, "skipping sheet");
                continue;
            }
        };
        if out.iter().any(|(r, _)| *r == role) {
            warn!(workbook = %label, sheet = %sheet_name, "duplicate role sheet; keeping the first");
            continue;
        }

        let range = workbook
            .worksheet_range(sheet_name)
            .with_context(|| format!("reading sheet {sheet_name} of {label}"))?;

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header_row) => header_row.iter().map(cell_text).collect(),
            None => {
                warn!(workbook = %label, sheet = %sheet_name, "sheet is empty");
                continue;
            }
        };

        // Blank filler rows at the bottom of a sheet are not data.
        let data: Vec<Vec<String>> = rows
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|cell| !cell.is_empty()))
            .collect();

        out.push((role, parse::table_from_cells(&headers, data)));
    }

    Ok(out)
}

/// Render a workbook cell as a string. Whole floats print without the
/// trailing `.0`, so numeric columns survive type promotion later.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => format!("{other}"),
    }
}

/// Minimal XLSX assembly for tests: a workbook is a zip of XML parts,
/// and inline-string cells keep it free of shared-string tables.
#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn escape(s: &str) -> String {
        s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
    }

    fn column_letter(idx: usize) -> char {
        (b'A' + idx as u8) as char
    }

    fn sheet_xml(rows: &[&[&str]]) -> String {
        let mut body = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\
             <sheetData>",
        );
        for (r, row) in rows.iter().enumerate() {
            body.push_str(&format!("<row r=\"{}\">", r + 1));
            for (c, cell) in row.iter().enumerate() {
                let pos = format!("{}{}", column_letter(c), r + 1);
                if cell.parse::<f64>().is_ok() {
                    body.push_str(&format!("<c r=\"{pos}\"><v>{cell}</v></c>"));
                } else if !cell.is_empty() {
                    body.push_str(&format!(
                        "<c r=\"{pos}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                        escape(cell)
                    ));
                }
            }
            body.push_str("</row>");
        }
        body.push_str("</sheetData></worksheet>");
        body
    }

    /// Build XLSX bytes holding the given `(sheet name, rows)` pairs.
    pub fn workbook_bytes(sheets: &[(&str, &[&[&str]])]) -> Vec<u8> {
        let mut content_types = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
             <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
             <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
             <Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>",
        );
        let mut workbook_xml = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
             xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"><sheets>",
        );
        let mut workbook_rels = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
        );
        for (i, (name, _)) in sheets.iter().enumerate() {
            let n = i + 1;
            content_types.push_str(&format!(
                "<Override PartName=\"/xl/worksheets/sheet{n}.xml\" \
                 ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>"
            ));
            workbook_xml.push_str(&format!(
                "<sheet name=\"{}\" sheetId=\"{n}\" r:id=\"rId{n}\"/>",
                escape(name)
            ));
            workbook_rels.push_str(&format!(
                "<Relationship Id=\"rId{n}\" \
                 Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" \
                 Target=\"worksheets/sheet{n}.xml\"/>"
            ));
        }
        content_types.push_str("</Types>");
        workbook_xml.push_str("</sheets></workbook>");
        workbook_rels.push_str("</Relationships>");

        let root_rels = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
             <Relationship Id=\"rId1\" \
             Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" \
             Target=\"xl/workbook.xml\"/></Relationships>";

        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            let mut put = |path: &str, content: &str| {
                zip.start_file(path, options).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            };
            put("[Content_Types].xml", &content_types);
            put("_rels/.rels", root_rels);
            put("xl/workbook.xml", &workbook_xml);
            put("xl/_rels/workbook.xml.rels", &workbook_rels);
            for (i, (_, rows)) in sheets.iter().enumerate() {
                put(&format!("xl/worksheets/sheet{}.xml", i + 1), &sheet_xml(rows));
            }
            zip.finish().unwrap();
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_roles_match_case_insensitively() {
        assert_eq!(SheetRole::from_sheet_name("varlist"), Some(SheetRole::VarList));
        assert_eq!(SheetRole::from_sheet_name(" VarList "), Some(SheetRole::VarList));
        assert_eq!(
            SheetRole::from_sheet_name("Frequencies"),
            Some(SheetRole::Frequencies)
        );
        assert_eq!(SheetRole::from_sheet_name("Description"), None);
    }

    #[test]
    fn role_table_names_carry_year_and_component() {
        assert_eq!(SheetRole::VarList.table_name(2004, "hd"), "vartable04_hd");
        assert_eq!(
            SheetRole::Frequencies.table_name(1999, "IC"),
            "valuesets99_ic"
        );
    }

    #[test]
    fn cell_text_formats_whole_floats_as_integers() {
        assert_eq!(cell_text(&Data::Float(100654.0)), "100654");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::String("  DayCare  ".into())), "DayCare");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn reads_role_sheets_and_skips_the_rest() -> Result<()> {
        let bytes = fixtures::workbook_bytes(&[
            (
                "varlist",
                &[
                    &["varnumber", "varname", "vartitle"],
                    &["1", "UNITID", "Unit identifier"],
                    &["2", "INSTNM", "Institution name"],
                ],
            ),
            ("Description", &[&["ignore me"]]),
            (
                "Frequencies",
                &[
                    &["varname", "codevalue", "valuelabel"],
                    &["SECTOR", "1", "Public 4-year"],
                ],
            ),
        ]);
        let sheets = read_dictionary(bytes, "dct_hd2002.xlsx")?;
        assert_eq!(sheets.len(), 2);

        let (role, varlist) = &sheets[0];
        assert_eq!(*role, SheetRole::VarList);
        assert_eq!(varlist.headers, vec!["varnumber", "varname", "vartitle"]);
        assert_eq!(varlist.rows.len(), 2);
        assert_eq!(varlist.rows[0][1], "UNITID");

        let (role, freqs) = &sheets[1];
        assert_eq!(*role, SheetRole::Frequencies);
        assert_eq!(freqs.rows[0][2], "Public 4-year");
        Ok(())
    }

    #[test]
    fn workbook_without_role_sheets_yields_nothing() -> Result<()> {
        let bytes = fixtures::workbook_bytes(&[("Notes", &[&["a"], &["b"]])]);
        let sheets = read_dictionary(bytes, "dct_empty.xlsx")?;
        assert!(sheets.is_empty());
        Ok(())
    }

    #[test]
    fn blank_filler_rows_are_dropped() -> Result<()> {
        let bytes = fixtures::workbook_bytes(&[(
            "varlist",
            &[&["varname"], &["UNITID"], &[""], &["SECTOR"]],
        )]);
        let sheets = read_dictionary(bytes, "dct.xlsx")?;
        assert_eq!(sheets[0].1.rows.len(), 2);
        Ok(())
    }
}
