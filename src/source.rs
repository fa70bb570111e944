use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::fetch::files::ArtifactClass;
use crate::process::workbook::SheetRole;
use crate::schema::names::canonical_table;

/// What a listed file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Delimited survey data, flat or zipped.
    Data,
    /// Dictionary workbook carrying role sheets.
    Dictionary,
}

impl FileKind {
    /// Validation class the downloader applies to this kind of file.
    pub fn artifact_class(self) -> ArtifactClass {
        match self {
            FileKind::Data => ArtifactClass::SurveyData,
            FileKind::Dictionary => ArtifactClass::Dictionary,
        }
    }
}

/// One remote file the scraper listed for a collection year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub year: i32,
    pub survey_component: String,
    pub kind: FileKind,
    pub url: String,
    /// Canonical destination for data files; dictionary targets derive
    /// from the year and component instead.
    pub table_name: String,
}

impl SourceFile {
    /// Validation class the downloader applies to this file.
    pub fn artifact_class(&self) -> ArtifactClass {
        self.kind.artifact_class()
    }

    /// Tables this file creates when imported. Used for the
    /// skip-if-present check, so dictionary files report both role
    /// tables even though a given workbook may only fill one.
    pub fn target_tables(&self) -> Vec<String> {
        match self.kind {
            FileKind::Data => vec![canonical_table(&self.table_name)],
            FileKind::Dictionary => vec![
                SheetRole::VarList.table_name(self.year, &self.survey_component),
                SheetRole::Frequencies.table_name(self.year, &self.survey_component),
            ],
        }
    }
}

/// Source of per-year file listings. The site scraper lives outside
/// this crate; anything that can produce listings plugs in here.
#[allow(async_fn_in_trait)]
pub trait FileLister {
    async fn files_for_year(&self, year: i32) -> Result<Vec<SourceFile>>;
}

/// Listing backed by a JSON manifest the external scraper writes:
/// a map of year to file entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestLister {
    years: BTreeMap<i32, Vec<SourceFile>>,
}

impl ManifestLister {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let years = serde_json::from_str(&text)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        Ok(ManifestLister { years })
    }

    pub fn new(years: BTreeMap<i32, Vec<SourceFile>>) -> Self {
        ManifestLister { years }
    }
}

impl FileLister for ManifestLister {
    async fn files_for_year(&self, year: i32) -> Result<Vec<SourceFile>> {
        Ok(self.years.get(&year).cloned().unwrap_or_default())
    }
}
