//! Remote archive download

use crate::error::{Error, Result};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

const FALLBACK_ARCHIVE_NAME: &str = "context-archive";

/// Outcome of a successful download
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub size: u64,
    /// `sha256:<hex>` of the bytes written
    pub digest: String,
}

pub fn parse_context_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| Error::Fetch {
        url: url.to_string(),
        reason: format!("invalid URL: {}", e),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(Error::Fetch {
            url: url.to_string(),
            reason: format!("unsupported URL scheme {:?}", other),
        }),
    }
}

/// File name to store the archive under, taken from the last URL path segment
pub fn archive_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty() && *name != "." && *name != ".." && *name != super::CONTENTS_DIR)
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_ARCHIVE_NAME.to_string())
}

/// Perform a single GET and stream the body into `dest`. No retries.
pub async fn download(client: &reqwest::Client, url: &Url, dest: &Path) -> Result<Downloaded> {
    let fetch_error = |reason: String| Error::Fetch {
        url: url.to_string(),
        reason,
    };

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| fetch_error(format!("request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(fetch_error(format!("unexpected status {}", status)));
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| fetch_error(format!("cannot create {}: {}", dest.display(), e)))?;

    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| fetch_error(format!("reading body failed: {}", e)))?;
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| fetch_error(format!("writing {} failed: {}", dest.display(), e)))?;
        size += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| fetch_error(format!("writing {} failed: {}", dest.display(), e)))?;

    let digest = format!("sha256:{}", hex::encode(hasher.finalize()));
    debug!(url = %url, bytes = size, digest = %digest, "context archive downloaded");

    Ok(Downloaded { size, digest })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_file_name_from_url() {
        let url = Url::parse("https://example.com/builds/app.tgz?sig=abc").unwrap();
        assert_eq!(archive_file_name(&url), "app.tgz");

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(archive_file_name(&url), FALLBACK_ARCHIVE_NAME);

        let url = Url::parse("https://example.com/contents").unwrap();
        assert_eq!(archive_file_name(&url), FALLBACK_ARCHIVE_NAME);
    }

    #[test]
    fn test_parse_context_url_rejects_other_schemes() {
        assert!(parse_context_url("https://example.com/a.tar").is_ok());
        assert!(matches!(
            parse_context_url("file:///etc/passwd"),
            Err(Error::Fetch { .. })
        ));
        assert!(matches!(parse_context_url("not a url"), Err(Error::Fetch { .. })));
    }
}
