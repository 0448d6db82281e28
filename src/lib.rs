//! Remote Image Builder Library
//!
//! Builds container images from a build context hosted at a remote URL. The context is
//! downloaded and unpacked locally, solved by an external build engine, checked against a
//! size limit and pushed to a registry.
//!
//! The build engine is reached through the [`BuildEngine`] trait; this crate never speaks
//! the registry protocol itself.

pub mod builder;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod progress;
pub mod push;
pub mod reference;
pub mod session;
pub mod solve;
pub mod validate;

pub use builder::ImageBuilder;
pub use config::{BuildOptions, BuilderConfig};
pub use context::{ContextManager, FetchFailure, FetchResult};
pub use engine::{BuildEngine, ImageMetadata, LocalDirs, Session, StatusResponse};
pub use error::{BuildPhase, Error, Result, SessionTask};
pub use logging::Logger;
pub use progress::{ConsoleProgress, ProgressDisplay, ProgressRelay, SolveStatus};
pub use push::Pusher;
pub use session::{OrchestrationState, SessionOrchestrator};
pub use solve::{build_solve_request, SolveRequest};
pub use validate::SizeValidator;
