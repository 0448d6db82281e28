//! Error types for the build pipeline
//!
//! Every component returns [`Result`]. Component errors are never retried
//! inside the crate; [`Error::is_retryable`] tells callers which ones are
//! worth another attempt.

use std::fmt;
use std::path::PathBuf;

pub mod handlers;

/// Phase of the top-level build that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Fetch,
    Extract,
    Solve,
    SizeCheck,
    Push,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildPhase::Fetch => "fetch",
            BuildPhase::Extract => "extract",
            BuildPhase::Solve => "solve",
            BuildPhase::SizeCheck => "size-check",
            BuildPhase::Push => "push",
        };
        f.write_str(name)
    }
}

/// The three supervised tasks of a session orchestration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTask {
    Transport,
    Work,
    Progress,
}

impl fmt::Display for SessionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionTask::Transport => "transport",
            SessionTask::Work => "work",
            SessionTask::Progress => "progress",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network or temp-filesystem failure while downloading the context
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Unsupported archive format for {path} (leading bytes: {signature})")]
    UnsupportedFormat { path: PathBuf, signature: String },

    #[error("Archive entry {entry:?} escapes the destination directory")]
    UnsafeArchiveEntry { entry: String },

    /// Signature matched but the stream could not be read as an archive
    #[error("Corrupt archive {path}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("Invalid image reference {reference:?}: {reason}")]
    InvalidImageReference { reference: String, reason: String },

    #[error("Malformed build argument {arg:?}: {reason}")]
    MalformedBuildArg { arg: String, reason: String },

    /// First failure observed inside a session orchestration
    #[error("Session {session_id} {task} task failed: {source}")]
    Orchestration {
        session_id: String,
        task: SessionTask,
        #[source]
        source: Box<Error>,
    },

    #[error("Image {image:?} is too large to push (size: {actual}, limit: {limit})")]
    ImageTooLarge { image: String, actual: u64, limit: u64 },

    #[error("Cannot validate size of image {image:?}: {reason}")]
    ImageInspection { image: String, reason: String },

    /// Failure reported by the build engine
    #[error("Build engine {operation} failed: {message}")]
    Engine { operation: &'static str, message: String },

    /// Progress stream could not be delivered
    #[error("Progress display failed: {0}")]
    Progress(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Top-level wrapper naming the phase of [`crate::ImageBuilder::build`] that failed
    #[error("Build failed during {phase}: {source}")]
    Build {
        phase: BuildPhase,
        #[source]
        source: Box<Error>,
    },
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        Error::Fetch {
            url,
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
