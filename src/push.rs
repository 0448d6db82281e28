//! Image push through a dedicated engine session

use crate::engine::{BuildEngine, LocalDirs};
use crate::error::Result;
use crate::logging::Logger;
use crate::progress::ProgressDisplay;
use crate::session::SessionOrchestrator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Pusher {
    engine: Arc<dyn BuildEngine>,
    logger: Logger,
    insecure: bool,
}

impl Pusher {
    pub fn new(engine: Arc<dyn BuildEngine>, logger: Logger, insecure: bool) -> Self {
        Self {
            engine,
            logger,
            insecure,
        }
    }

    /// Push `image` from the engine's store to its registry.
    ///
    /// Runs its own session orchestration with no local directories bound.
    pub async fn push(
        &self,
        cancel: &CancellationToken,
        image: &str,
        display: &mut dyn ProgressDisplay,
    ) -> Result<()> {
        self.logger.step(&format!("Pushing {}", image));

        let orchestrator = SessionOrchestrator::new(self.engine.clone(), self.logger.clone());
        let session = orchestrator.establish(cancel, LocalDirs::new()).await?;
        let session_id = session.id().to_string();

        let engine = self.engine.clone();
        let insecure = self.insecure;
        orchestrator
            .run(cancel, session, display, move |status| async move {
                // push reports no build progress
                drop(status);
                engine.push(&session_id, image, insecure).await
            })
            .await?;

        info!(image, insecure, "image pushed");
        self.logger.success(&format!("Pushed {}", image));
        Ok(())
    }
}
