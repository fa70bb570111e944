use anyhow::{Context, Result};
use url::Url;

/// Rewrite a share-page URL into a direct-download URL.
///
/// Listing pages on the survey portal sometimes point at hosting
/// services instead of the file itself: Dropbox share links download
/// only when `dl=1`, and Google Drive viewer links need the
/// `uc?export=download` form. Anything unrecognized passes through.
pub fn resolve_direct_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw).with_context(|| format!("invalid url: {raw}"))?;
    let host = url.host_str().unwrap_or_default();

    if host == "dropbox.com" || host.ends_with(".dropbox.com") {
        return Ok(resolve_dropbox(url));
    }
    if host == "drive.google.com" {
        if let Some(direct) = resolve_google_drive(&url) {
            return Ok(direct);
        }
    }
    Ok(url.into())
}

/// Force `dl=1`, preserving the other query parameters.
fn resolve_dropbox(mut url: Url) -> String {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "dl")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        query.append_pair("dl", "1");
    }
    url.into()
}

/// `file/d/<id>/view` and `open?id=<id>` forms both carry a file id.
fn resolve_google_drive(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    if segments.first() == Some(&"file") && segments.get(1) == Some(&"d") {
        let id = segments.get(2).filter(|id| !id.is_empty())?;
        return Some(format!(
            "https://drive.google.com/uc?export=download&id={id}"
        ));
    }
    if url.path() == "/open" {
        let id = url
            .query_pairs()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.into_owned())
            .filter(|id| !id.is_empty())?;
        return Some(format!(
            "https://drive.google.com/uc?export=download&id={id}"
        ));
    }
    None
}
