use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::duck::Store;
use crate::fetch::{download_file_with_policy, DownloadPolicy};
use crate::process::{import_dictionary, import_file, ImportOptions};
use crate::schema::consolidate::{consolidate_all, ConsolidationReport};
use crate::source::{FileKind, FileLister, SourceFile};

/// Years outside this range are caller mistakes, not data.
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=2100;

/// Knobs for one update run.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Re-download and re-import files whose target tables already exist.
    pub force: bool,
    /// Pause between successive remote fetches.
    pub throttle: Duration,
    /// Where downloaded payloads land.
    pub download_dir: PathBuf,
    pub import: ImportOptions,
    pub download: DownloadPolicy,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            force: false,
            throttle: Duration::from_secs(1),
            download_dir: PathBuf::from("downloads"),
            import: ImportOptions::default(),
            download: DownloadPolicy::default(),
        }
    }
}

/// Outcome of one requested year.
#[derive(Debug, Clone)]
pub struct YearSummary {
    pub year: i32,
    pub files_found: usize,
    pub files_downloaded: usize,
    pub files_imported: usize,
    /// Per-file failures, one string each. These never abort the run.
    pub errors: Vec<String>,
}

impl YearSummary {
    fn new(year: i32) -> Self {
        YearSummary {
            year,
            files_found: 0,
            files_downloaded: 0,
            files_imported: 0,
            errors: Vec::new(),
        }
    }
}

/// What a whole run did: per-year counts plus the consolidation outcome.
#[derive(Debug, Clone)]
pub struct UpdateRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub years: Vec<YearSummary>,
    pub consolidations: Vec<ConsolidationReport>,
    pub consolidation_errors: Vec<String>,
}

impl UpdateRun {
    pub fn total_imported(&self) -> usize {
        self.years.iter().map(|y| y.files_imported).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.consolidation_errors.is_empty() && self.years.iter().all(|y| y.errors.is_empty())
    }
}

/// Files a run would actually fetch: those with every target table still
/// missing from the store.
pub fn pending_files<'a>(store: &Store, files: &'a [SourceFile]) -> Result<Vec<&'a SourceFile>> {
    let mut pending = Vec::new();
    for file in files {
        if !any_target_exists(store, file)? {
            pending.push(file);
        }
    }
    Ok(pending)
}

fn any_target_exists(store: &Store, file: &SourceFile) -> Result<bool> {
    for table in file.target_tables() {
        if store.table_exists(&table)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Run a full update over the requested years, in caller order: list each
/// year's files, download and import the pending ones, then rebuild the
/// metadata views once at the end of the batch.
///
/// Per-file and per-year failures land in the returned summary and never
/// abort sibling work. Only invalid caller input errors out here; a broken
/// store connection will already have surfaced at `Store::open`.
#[tracing::instrument(level = "info", skip(store, client, lister, options))]
pub async fn run_update<L: FileLister>(
    store: &Store,
    client: &Client,
    lister: &L,
    years: &[i32],
    options: &UpdateOptions,
) -> Result<UpdateRun> {
    if years.is_empty() {
        bail!("no years requested");
    }
    if let Some(bad) = years.iter().copied().find(|y| !YEAR_RANGE.contains(y)) {
        bail!("{bad} is not a plausible collection year");
    }

    let started_at = Utc::now();
    let mut summaries = Vec::with_capacity(years.len());
    let mut fetched_any = false;

    for &year in years {
        let mut summary = YearSummary::new(year);

        let files = match lister.files_for_year(year).await {
            Ok(files) => files,
            Err(err) => {
                warn!(year, error = %err, "file listing failed");
                summary.errors.push(format!("listing files: {err:#}"));
                summaries.push(summary);
                continue;
            }
        };
        summary.files_found = files.len();
        info!(year, files = files.len(), "processing year");

        for file in &files {
            if !options.force {
                match any_target_exists(store, file) {
                    Ok(true) => {
                        debug!(year, table = %file.table_name, "target tables exist; skipping");
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        summary.errors.push(format!("{}: {err:#}", file.table_name));
                        continue;
                    }
                }
            }

            // politeness throttle between remote fetches, skipped files excluded
            if fetched_any && !options.throttle.is_zero() {
                tokio::time::sleep(options.throttle).await;
            }
            fetched_any = true;

            let path = match download_file_with_policy(
                client,
                &file.url,
                &options.download_dir,
                file.artifact_class(),
                &options.download,
            )
            .await
            {
                Ok(path) => {
                    summary.files_downloaded += 1;
                    path
                }
                Err(err) => {
                    summary.errors.push(format!("{}: {err:#}", file.table_name));
                    continue;
                }
            };

            let imported = match file.kind {
                FileKind::Data => import_file(store, &path, &file.table_name, &options.import)
                    .map(|outcome| vec![outcome]),
                FileKind::Dictionary => import_dictionary(
                    store,
                    &path,
                    file.year,
                    &file.survey_component,
                    &options.import,
                ),
            };
            match imported {
                Ok(outcomes) => {
                    summary.files_imported += 1;
                    for outcome in &outcomes {
                        debug!(year, table = %outcome.table, rows = outcome.rows, "table ready");
                    }
                }
                Err(err) => {
                    summary.errors.push(format!("{}: {err:#}", file.table_name));
                }
            }
        }

        info!(
            year,
            found = summary.files_found,
            downloaded = summary.files_downloaded,
            imported = summary.files_imported,
            failed = summary.errors.len(),
            "year complete"
        );
        summaries.push(summary);
    }

    // one consolidation pass per batch, after every year has landed
    let (consolidations, consolidation_errors) = consolidate_all(store);

    Ok(UpdateRun {
        started_at,
        finished_at: Utc::now(),
        years: summaries,
        consolidations,
        consolidation_errors,
    })
}
