//! Build engine client interface
//!
//! The build engine is an external collaborator. This module fixes the calls the
//! pipeline makes on it: session establishment with named local directories, solve
//! with a status channel, image metadata lookup, and push.

use crate::error::Result;
use crate::solve::SolveRequest;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Local directory binding name for the build context
pub const LOCAL_DIR_CONTEXT: &str = "context";
/// Local directory binding name for the Dockerfile location
pub const LOCAL_DIR_DOCKERFILE: &str = "dockerfile";

/// Named local directories exposed to the engine through a session
pub type LocalDirs = HashMap<String, PathBuf>;

/// A bidirectional channel between the caller and the build engine
#[async_trait]
pub trait Session: Send + Sync {
    fn id(&self) -> &str;

    /// Serve the transport until the session is closed.
    ///
    /// Returns `Ok(())` once [`Session::close`] has been called.
    async fn run(&self) -> Result<()>;

    /// Release the transport. Calling it more than once has no further effect.
    async fn close(&self);
}

#[async_trait]
pub trait BuildEngine: Send + Sync {
    async fn session(&self, local_dirs: LocalDirs) -> Result<Arc<dyn Session>>;

    /// Run a solve. The engine drops `status` once it has emitted its last event.
    async fn solve(
        &self,
        session_id: &str,
        request: SolveRequest,
        status: mpsc::Sender<StatusResponse>,
    ) -> Result<()>;

    async fn image_metadata(&self, name: &str) -> Result<ImageMetadata>;

    async fn push(&self, session_id: &str, name: &str, insecure: bool) -> Result<()>;
}

/// Metadata of an image held in the engine's local store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    pub name: String,
    pub digest: String,
    /// Total size of the image content in bytes
    pub content_size: u64,
}

/// One batch of low-level progress events as emitted by the engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusResponse {
    pub vertexes: Vec<VertexRecord>,
    pub statuses: Vec<VertexStatusRecord>,
    pub logs: Vec<VertexLogRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexRecord {
    pub digest: String,
    pub inputs: Vec<String>,
    pub name: String,
    pub started: Option<SystemTime>,
    pub completed: Option<SystemTime>,
    /// Empty when the vertex has not failed
    pub error: String,
    pub cached: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexStatusRecord {
    pub id: String,
    pub vertex: String,
    pub name: String,
    pub total: i64,
    pub current: i64,
    pub timestamp: Option<SystemTime>,
    pub started: Option<SystemTime>,
    pub completed: Option<SystemTime>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexLogRecord {
    pub vertex: String,
    /// 1 for stdout, 2 for stderr
    pub stream: i64,
    pub msg: Vec<u8>,
    pub timestamp: Option<SystemTime>,
}
