//! Top-level build pipeline
//!
//! [`ImageBuilder::build`] chains the phases in order:
//!
//! 1. fetch and extract the remote context
//! 2. solve the Dockerfile in a session bound to the extracted contents
//! 3. check the produced image against the size limit
//! 4. push the image in a second session
//!
//! The temporary context is removed as soon as the solve phase ends, whatever its outcome.
//! Every returned error is an [`Error::Build`] naming the failed phase.

use crate::config::{BuildOptions, BuilderConfig};
use crate::context::{ContextManager, FetchResult};
use crate::engine::{BuildEngine, LocalDirs, LOCAL_DIR_CONTEXT, LOCAL_DIR_DOCKERFILE};
use crate::error::{BuildPhase, Error, Result};
use crate::logging::Logger;
use crate::progress::{ConsoleProgress, ProgressDisplay};
use crate::push::Pusher;
use crate::session::SessionOrchestrator;
use crate::solve::build_solve_request;
use crate::validate::SizeValidator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ImageBuilder {
    engine: Arc<dyn BuildEngine>,
    config: BuilderConfig,
    logger: Logger,
    contexts: ContextManager,
}

impl ImageBuilder {
    pub fn new(engine: Arc<dyn BuildEngine>, config: BuilderConfig) -> Self {
        let logger = config.logger();
        let contexts = ContextManager::new(config.work_dir.clone(), logger.clone());
        Self {
            engine,
            config,
            logger,
            contexts,
        }
    }

    /// Replace the context manager, e.g. to use a preconfigured HTTP client
    pub fn with_context_manager(mut self, contexts: ContextManager) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Build and push an image, printing progress to the console.
    ///
    /// Returns the normalized image reference that was pushed.
    pub async fn build(&self, cancel: &CancellationToken, opts: &BuildOptions) -> Result<String> {
        let mut display = ConsoleProgress::new(self.logger.clone());
        self.build_with_display(cancel, opts, &mut display).await
    }

    pub async fn build_with_display(
        &self,
        cancel: &CancellationToken,
        opts: &BuildOptions,
        display: &mut dyn ProgressDisplay,
    ) -> Result<String> {
        self.logger.section("Remote Image Build");

        let context = match self.contexts.fetch_and_extract_with_cancel(&opts.context, cancel).await {
            Ok(context) => context,
            Err(failure) => {
                let phase = failure.phase();
                let error = failure.cleanup().await;
                return Err(self.failed(error.in_phase(phase)));
            }
        };

        let solved = self.solve(cancel, &context, opts, display).await;
        let root = context.root_dir.clone();
        let context_summary = format!(
            "{} ({})",
            self.logger.format_size(context.archive_size),
            context.archive_digest
        );
        if let Err(e) = context.remove().await {
            warn!(root = %root.display(), error = %e, "failed to remove build context");
            self.logger
                .warning(&format!("Build context {} was not removed: {}", root.display(), e));
        }
        let image = solved.map_err(|e| self.failed(e.in_phase(BuildPhase::Solve)))?;

        SizeValidator::new(self.engine.clone(), self.logger.clone())
            .validate(&image, opts.size_limit)
            .await
            .map_err(|e| self.failed(e.in_phase(BuildPhase::SizeCheck)))?;

        Pusher::new(self.engine.clone(), self.logger.clone(), self.config.insecure_registry)
            .push(cancel, &image, display)
            .await
            .map_err(|e| self.failed(e.in_phase(BuildPhase::Push)))?;

        info!(image = %image, "build completed");
        self.logger.success(&format!("Built and pushed {}", image));
        self.logger.summary_kv(
            "Build Summary",
            &[
                ("Image", image.clone()),
                ("Context", context_summary),
                ("Elapsed", self.logger.format_duration(self.logger.elapsed())),
            ],
        );
        Ok(image)
    }

    async fn solve(
        &self,
        cancel: &CancellationToken,
        context: &FetchResult,
        opts: &BuildOptions,
        display: &mut dyn ProgressDisplay,
    ) -> Result<String> {
        let local_dirs = LocalDirs::from([
            (LOCAL_DIR_CONTEXT.to_string(), context.contents_dir.clone()),
            (LOCAL_DIR_DOCKERFILE.to_string(), context.contents_dir.clone()),
        ]);

        let orchestrator = SessionOrchestrator::new(self.engine.clone(), self.logger.clone());
        let session = orchestrator.establish(cancel, local_dirs).await?;

        let request = match build_solve_request(session.id(), opts) {
            Ok(request) => request,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };
        let image = request.image_name().to_string();
        if let Ok(encoded) = serde_json::to_string(&request) {
            debug!(request = %encoded, "solve request");
        }
        self.logger.step(&format!("Building {}", image));

        let session_id = session.id().to_string();
        let engine = self.engine.clone();
        orchestrator
            .run(cancel, session, display, move |status| async move {
                engine.solve(&session_id, request, status).await
            })
            .await?;

        Ok(image)
    }

    fn failed(&self, error: Error) -> Error {
        self.logger.error(&error.to_string());
        error
    }
}
