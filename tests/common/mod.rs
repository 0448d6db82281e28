//! Shared helpers for integration tests: archive fixtures and a scripted build engine

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use remote_image_builder::engine::{LOCAL_DIR_CONTEXT, VertexRecord};
use remote_image_builder::{
    BuildEngine, Error, ImageMetadata, LocalDirs, ProgressDisplay, Result, Session, SolveRequest,
    SolveStatus, StatusResponse,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::SystemTime;
use tokio::sync::{Notify, mpsc};

pub fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn tgz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes(files)).unwrap();
    encoder.finish().unwrap()
}

/// Tar holding one regular file whose raw header name is written verbatim
pub fn tar_with_raw_name(name: &str, data: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    let bytes = name.as_bytes();
    header.as_old_mut().name[..bytes.len()].copy_from_slice(bytes);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data).unwrap();
    builder.into_inner().unwrap()
}

pub const DOCKERFILE: &[u8] = b"FROM python:3.12-slim\nCOPY app.py /app.py\nCMD [\"python\", \"/app.py\"]\n";
pub const APP_PY: &[u8] = b"print('hello')\n";

pub fn context_fixture() -> Vec<u8> {
    tgz_bytes(&[("Dockerfile", DOCKERFILE), ("app.py", APP_PY)])
}

pub struct ScriptedSession {
    id: String,
    pub local_dirs: LocalDirs,
    released: Notify,
    closed: AtomicBool,
    pub close_calls: AtomicUsize,
}

impl ScriptedSession {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for ScriptedSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self) -> Result<()> {
        if !self.is_closed() {
            self.released.notified().await;
        }
        Ok(())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.released.notify_one();
    }
}

/// In-memory build engine driven by a fixed script
#[derive(Default)]
pub struct ScriptedEngine {
    pub image_size: u64,
    pub solve_error: Option<String>,
    pub push_error: Option<String>,
    pub metadata_error: Option<String>,
    pub sessions: Mutex<Vec<Arc<ScriptedSession>>>,
    pub requests: Mutex<Vec<SolveRequest>>,
    /// Files visible in the context directory while the solve ran
    pub context_files: Mutex<Vec<String>>,
    pub pushed: Mutex<Vec<(String, bool)>>,
}

impl ScriptedEngine {
    pub fn with_size(image_size: u64) -> Self {
        Self {
            image_size,
            ..Default::default()
        }
    }

    fn find_session(&self, id: &str) -> Option<Arc<ScriptedSession>> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn all_sessions_closed_once(&self) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .all(|s| s.close_calls.load(Ordering::SeqCst) == 1)
    }
}

#[async_trait]
impl BuildEngine for ScriptedEngine {
    async fn session(&self, local_dirs: LocalDirs) -> Result<Arc<dyn Session>> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = Arc::new(ScriptedSession {
            id: format!("session-{}", sessions.len() + 1),
            local_dirs,
            released: Notify::new(),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        });
        sessions.push(session.clone());
        Ok(session)
    }

    async fn solve(
        &self,
        session_id: &str,
        request: SolveRequest,
        status: mpsc::Sender<StatusResponse>,
    ) -> Result<()> {
        let session = self
            .find_session(session_id)
            .ok_or_else(|| Error::engine("solve", format!("unknown session {}", session_id)))?;

        if let Some(dir) = session.local_dirs.get(LOCAL_DIR_CONTEXT) {
            let mut names: Vec<String> = std::fs::read_dir(dir)
                .map_err(Error::Io)?
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            *self.context_files.lock().unwrap() = names;
        }
        self.requests.lock().unwrap().push(request);

        let now = SystemTime::now();
        let _ = status
            .send(StatusResponse {
                vertexes: vec![VertexRecord {
                    digest: "sha256:step1".to_string(),
                    name: "[1/2] FROM python:3.12-slim".to_string(),
                    started: Some(now),
                    completed: Some(now),
                    cached: true,
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await;

        match &self.solve_error {
            Some(message) => Err(Error::engine("solve", message.clone())),
            None => Ok(()),
        }
    }

    async fn image_metadata(&self, name: &str) -> Result<ImageMetadata> {
        if let Some(message) = &self.metadata_error {
            return Err(Error::engine("image metadata", message.clone()));
        }
        Ok(ImageMetadata {
            name: name.to_string(),
            digest: "sha256:feedface".to_string(),
            content_size: self.image_size,
        })
    }

    async fn push(&self, session_id: &str, name: &str, insecure: bool) -> Result<()> {
        self.find_session(session_id)
            .ok_or_else(|| Error::engine("push", format!("unknown session {}", session_id)))?;
        if let Some(message) = &self.push_error {
            return Err(Error::engine("push", message.clone()));
        }
        self.pushed.lock().unwrap().push((name.to_string(), insecure));
        Ok(())
    }
}

/// Display that keeps every snapshot it receives
#[derive(Default)]
pub struct RecordingDisplay {
    pub updates: Vec<SolveStatus>,
}

#[async_trait]
impl ProgressDisplay for RecordingDisplay {
    async fn display(&mut self, mut updates: mpsc::Receiver<SolveStatus>) -> Result<()> {
        while let Some(status) = updates.recv().await {
            self.updates.push(status);
        }
        Ok(())
    }
}

/// Display that gives up after the first snapshot
pub struct BrokenDisplay;

#[async_trait]
impl ProgressDisplay for BrokenDisplay {
    async fn display(&mut self, mut updates: mpsc::Receiver<SolveStatus>) -> Result<()> {
        updates.recv().await;
        Err(Error::Progress("output closed".to_string()))
    }
}

pub fn entries(dir: &std::path::Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(read) => read.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}
