use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::warn;
use zip::ZipArchive;

const TABULAR_EXTENSIONS: &[&str] = &[".csv"];
const WORKBOOK_EXTENSIONS: &[&str] = &[".xlsx", ".xls"];

/// Read the tabular payload of a source file. Flat files come back
/// whole; zip archives are searched for the entry carrying a tabular
/// extension. Returns the payload label (for logs) and its bytes.
pub fn read_tabular_payload(path: &Path) -> Result<(String, Vec<u8>)> {
    read_payload(path, TABULAR_EXTENSIONS, "tabular")
}

/// Same, for dictionary workbooks.
pub fn read_workbook_payload(path: &Path) -> Result<(String, Vec<u8>)> {
    read_payload(path, WORKBOOK_EXTENSIONS, "workbook")
}

fn read_payload(path: &Path, extensions: &[&str], what: &str) -> Result<(String, Vec<u8>)> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if has_extension(&file_name, extensions) {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        return Ok((file_name, bytes));
    }

    if !has_extension(&file_name, &[".zip"]) {
        bail!(
            "{} is neither a {what} file nor a zip archive",
            path.display()
        );
    }

    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("reading zip {}", path.display()))?;

    // 1) Find entries with a matching extension.
    let mut candidates = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_string();
        if has_extension(&entry_name, extensions) {
            candidates.push((i, entry_name));
        }
    }

    // 2) Exactly one payload is expected; take the first otherwise.
    if candidates.is_empty() {
        bail!("{}: no {what} payload inside archive", path.display());
    }
    if candidates.len() > 1 {
        warn!(
            zip = %path.display(),
            count = candidates.len(),
            using = %candidates[0].1,
            "multiple {what} entries in archive; using the first"
        );
    }
    let (idx, entry_name) = candidates.swap_remove(0);

    let mut entry = archive.by_index(idx)?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .with_context(|| format!("extracting {entry_name} from {}", path.display()))?;
    Ok((entry_name, buf))
}

fn has_extension(name: &str, extensions: &[&str]) -> bool {
    let lower = name.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
        let file = File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, bytes) in entries {
            zip.start_file(*name, options)?;
            zip.write_all(bytes)?;
        }
        zip.finish()?;
        Ok(())
    }

    #[test]
    fn flat_csv_passes_through() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("hd2002.csv");
        std::fs::write(&path, b"unitid,instnm\n1,a\n")?;
        let (label, bytes) = read_tabular_payload(&path)?;
        assert_eq!(label, "hd2002.csv");
        assert!(bytes.starts_with(b"unitid"));
        Ok(())
    }

    #[test]
    fn zip_yields_the_csv_entry() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("hd2002.zip");
        write_zip(
            &path,
            &[("readme.txt", b"ignore me"), ("hd2002.csv", b"unitid\n1\n")],
        )?;
        let (label, bytes) = read_tabular_payload(&path)?;
        assert_eq!(label, "hd2002.csv");
        assert_eq!(bytes, b"unitid\n1\n");
        Ok(())
    }

    #[test]
    fn first_entry_wins_when_several_match() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("hd2002.zip");
        write_zip(
            &path,
            &[("hd2002.csv", b"first\n"), ("hd2002_rv.csv", b"second\n")],
        )?;
        let (label, bytes) = read_tabular_payload(&path)?;
        assert_eq!(label, "hd2002.csv");
        assert_eq!(bytes, b"first\n");
        Ok(())
    }

    #[test]
    fn archive_without_payload_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.zip");
        write_zip(&path, &[("notes.md", b"nothing tabular")])?;
        assert!(read_tabular_payload(&path).is_err());
        Ok(())
    }

    #[test]
    fn workbook_found_by_extension() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("dct2004.zip");
        write_zip(&path, &[("dct2004.xlsx", b"not really a workbook")])?;
        let (label, bytes) = read_workbook_payload(&path)?;
        assert_eq!(label, "dct2004.xlsx");
        assert_eq!(bytes, b"not really a workbook");
        Ok(())
    }

    #[test]
    fn unrelated_extension_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"pdf bytes")?;
        assert!(read_tabular_payload(&path).is_err());
        Ok(())
    }
}
