//! Build context acquisition
//!
//! The [`ContextManager`] downloads a remote archive into a fresh temporary root and
//! unpacks it next to the download:
//!
//! ```text
//! <work_dir>/context-<id>/
//!     <archive-file>
//!     contents/...
//! ```
//!
//! The caller owns the root. It is removed explicitly with [`FetchResult::remove`]; nothing
//! is cleaned up on drop.

pub mod extract;
pub mod fetch;

use crate::error::{BuildPhase, Error, Result};
use crate::logging::Logger;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

pub use extract::{detect_format, ArchiveFormat, ExtractSummary};

pub const CONTENTS_DIR: &str = "contents";

/// Temporary filesystem state produced by one fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// Sole owner of everything below; removing it invalidates the other paths
    pub root_dir: PathBuf,
    pub archive: PathBuf,
    pub contents_dir: PathBuf,
    pub archive_size: u64,
    pub archive_digest: String,
}

impl FetchResult {
    /// Delete the whole temporary root. A root that is already gone is not an error.
    pub async fn remove(self) -> Result<()> {
        remove_root(&self.root_dir).await
    }

    /// Relative paths of all non-directory entries under the contents directory
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.contents_dir).follow_links(false) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if entry.file_type().is_dir() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.contents_dir) {
                files.push(relative.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// A failed fetch, carrying whatever was already written so the caller can inspect it
/// and clean it up
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct FetchFailure {
    /// Present when the download succeeded and extraction failed
    pub partial: Option<FetchResult>,
    #[source]
    pub error: Error,
}

impl FetchFailure {
    fn bare(error: Error) -> Self {
        Self {
            partial: None,
            error,
        }
    }

    pub fn phase(&self) -> BuildPhase {
        if self.partial.is_some() {
            BuildPhase::Extract
        } else {
            BuildPhase::Fetch
        }
    }

    /// Root directory to remove, if any state was left behind
    pub fn root_dir(&self) -> Option<&Path> {
        self.partial.as_ref().map(|p| p.root_dir.as_path())
    }

    /// Remove any partial state and return the underlying error
    pub async fn cleanup(self) -> Error {
        if let Some(partial) = self.partial {
            if let Err(e) = partial.remove().await {
                debug!(error = %e, "failed to remove partial context");
            }
        }
        self.error
    }
}

/// Fetches and extracts remote build contexts
#[derive(Debug, Clone)]
pub struct ContextManager {
    client: reqwest::Client,
    work_dir: PathBuf,
    logger: Logger,
}

impl ContextManager {
    pub fn new(work_dir: impl Into<PathBuf>, logger: Logger) -> Self {
        Self::with_client(reqwest::Client::new(), work_dir, logger)
    }

    pub fn with_client(client: reqwest::Client, work_dir: impl Into<PathBuf>, logger: Logger) -> Self {
        Self {
            client,
            work_dir: work_dir.into(),
            logger,
        }
    }

    pub async fn fetch_and_extract(&self, url: &str) -> std::result::Result<FetchResult, FetchFailure> {
        self.fetch_and_extract_with_cancel(url, &CancellationToken::new())
            .await
    }

    /// Fetch `url` and unpack it.
    ///
    /// A fetch failure (including cancellation during download) leaves nothing on disk.
    /// An extraction failure returns the downloaded state in [`FetchFailure::partial`].
    pub async fn fetch_and_extract_with_cancel(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<FetchResult, FetchFailure> {
        let parsed = fetch::parse_context_url(url).map_err(FetchFailure::bare)?;

        let root_dir = self
            .work_dir
            .join(format!("context-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&root_dir).await.map_err(|e| {
            FetchFailure::bare(Error::Fetch {
                url: url.to_string(),
                reason: format!("cannot create {}: {}", root_dir.display(), e),
            })
        })?;

        let archive = root_dir.join(fetch::archive_file_name(&parsed));
        self.logger.step(&format!("Fetching build context {}", url));

        let downloaded = tokio::select! {
            result = fetch::download(&self.client, &parsed, &archive) => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };
        let downloaded = match downloaded {
            Ok(downloaded) => downloaded,
            Err(error) => {
                if let Err(e) = remove_root(&root_dir).await {
                    debug!(root = %root_dir.display(), error = %e, "failed to remove fetch root");
                }
                return Err(FetchFailure::bare(error));
            }
        };
        self.logger.detail(&format!(
            "Downloaded {} ({})",
            self.logger.format_size(downloaded.size),
            downloaded.digest
        ));

        let result = FetchResult {
            contents_dir: root_dir.join(CONTENTS_DIR),
            root_dir,
            archive,
            archive_size: downloaded.size,
            archive_digest: downloaded.digest,
        };

        let archive_path = result.archive.clone();
        let contents_dir = result.contents_dir.clone();
        let extracted =
            tokio::task::spawn_blocking(move || extract::extract(&archive_path, &contents_dir))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
                .and_then(|r| r);

        match extracted {
            Ok(summary) => {
                info!(
                    url = %url,
                    root = %result.root_dir.display(),
                    files = summary.files,
                    links = summary.links,
                    skipped = summary.skipped,
                    "build context extracted"
                );
                self.logger.detail(&format!(
                    "Extracted {} files into {}",
                    summary.files,
                    result.contents_dir.display()
                ));
                Ok(result)
            }
            Err(error) => Err(FetchFailure {
                partial: Some(result),
                error,
            }),
        }
    }
}

async fn remove_root(root: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(root).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}
