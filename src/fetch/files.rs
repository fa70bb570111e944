use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

use crate::fetch::urls::resolve_direct_url;

/// How many times a download is attempted before giving up.
const MAX_ATTEMPTS: u32 = 5;
/// Base delay for exponential backoff between attempts.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// What a downloaded payload is expected to be. Each class carries a minimum
/// plausible size so that truncated downloads and error pages served with a
/// 200 status are caught before anything tries to parse them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactClass {
    DatabaseSnapshot,
    SurveyData,
    Dictionary,
}

impl ArtifactClass {
    pub fn min_bytes(self) -> u64 {
        match self {
            ArtifactClass::DatabaseSnapshot => 10 * 1024 * 1024,
            ArtifactClass::SurveyData | ArtifactClass::Dictionary => 1024,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactClass::DatabaseSnapshot => "database snapshot",
            ArtifactClass::SurveyData => "survey data",
            ArtifactClass::Dictionary => "dictionary",
        }
    }
}

/// Retry knobs for [`download_file_with_policy`].
#[derive(Debug, Clone)]
pub struct DownloadPolicy {
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        DownloadPolicy {
            max_attempts: MAX_ATTEMPTS,
            retry_base_delay: RETRY_BASE_DELAY,
        }
    }
}

/// Download `url_str` into `dest_dir` with the default retry policy, naming
/// the file after the last URL path segment. Returns the saved path.
pub async fn download_file(
    client: &Client,
    url_str: &str,
    dest_dir: impl AsRef<Path>,
    class: ArtifactClass,
) -> Result<PathBuf> {
    download_file_with_policy(client, url_str, dest_dir, class, &DownloadPolicy::default()).await
}

/// Download `url_str` into `dest_dir`, validating the payload against `class`
/// and retrying failures with exponential backoff. Sharing links are resolved
/// to direct-download form before the first attempt; a payload that fails
/// validation is deleted and the attempt counts as a failure.
pub async fn download_file_with_policy(
    client: &Client,
    url_str: &str,
    dest_dir: impl AsRef<Path>,
    class: ArtifactClass,
    policy: &DownloadPolicy,
) -> Result<PathBuf> {
    let dest_dir = dest_dir.as_ref();
    let direct = resolve_direct_url(url_str)?;
    let url = Url::parse(&direct)?;
    let filename = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.bin");
    let dest_path = dest_dir.join(filename);

    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut last_error = None;
    for attempt in 1..=policy.max_attempts.max(1) {
        match fetch_once(client, &direct, &dest_path, class).await {
            Ok(bytes) => {
                info!(
                    url = %direct,
                    path = %dest_path.display(),
                    bytes,
                    attempt,
                    "downloaded file"
                );
                return Ok(dest_path);
            }
            Err(err) => {
                warn!(url = %direct, attempt, error = %err, "download attempt failed");
                if attempt < policy.max_attempts {
                    let delay = policy.retry_base_delay * 2_u32.saturating_pow(attempt - 1);
                    debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(err);
            }
        }
    }

    let err = last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts were made"));
    Err(err).with_context(|| {
        format!(
            "downloading {direct} after {} attempts",
            policy.max_attempts.max(1)
        )
    })
}

/// One fetch attempt: GET, write to disk, validate. A payload that fails
/// validation is removed from disk before the error is returned.
async fn fetch_once(client: &Client, url: &str, dest_path: &Path, class: ArtifactClass) -> Result<u64> {
    let resp = client.get(url).send().await?.error_for_status()?;
    let bytes = resp.bytes().await?;
    fs::write(dest_path, &bytes).await?;

    if let Err(err) = validate_payload(&bytes, class) {
        fs::remove_file(dest_path)
            .await
            .with_context(|| format!("removing rejected payload {}", dest_path.display()))?;
        return Err(err.context(format!("rejected payload from {url}")));
    }
    Ok(bytes.len() as u64)
}

fn validate_payload(bytes: &[u8], class: ArtifactClass) -> Result<()> {
    if looks_like_markup(bytes) {
        bail!("server returned an HTML page instead of a {}", class.as_str());
    }
    let min = class.min_bytes();
    if (bytes.len() as u64) < min {
        bail!(
            "payload is {} bytes, below the {} byte minimum for a {}",
            bytes.len(),
            min,
            class.as_str()
        );
    }
    Ok(())
}

/// Sniff for an HTML document at the start of the payload. Skips a UTF-8 BOM
/// and leading whitespace, then checks the first bytes case-insensitively.
fn looks_like_markup(bytes: &[u8]) -> bool {
    let mut rest = bytes;
    if let Some(stripped) = rest.strip_prefix(b"\xEF\xBB\xBF") {
        rest = stripped;
    }
    while let Some((first, tail)) = rest.split_first() {
        if first.is_ascii_whitespace() {
            rest = tail;
        } else {
            break;
        }
    }
    let head: String = rest
        .iter()
        .take(64)
        .map(|b| (*b as char).to_ascii_lowercase())
        .collect();
    ["<!doctype", "<html", "<head", "<body"]
        .iter()
        .any(|tag| head.starts_with(tag))
}
