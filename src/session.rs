//! Session orchestration
//!
//! A session with the build engine is driven by three tasks that live and die together:
//!
//! 1. **transport** serves the session's duplex channel until it is closed;
//! 2. **work** issues the engine call (solve or push) and, when it returns, releases the
//!    transport so the transport task can finish;
//! 3. **progress** relays status events to a display until the status channel closes.
//!
//! All three share one cancellation scope derived from the caller's token. The first task
//! to fail records its error and cancels the scope; the others unwind. [`SessionOrchestrator::run`]
//! returns only after all three have exited.

use crate::engine::{BuildEngine, LocalDirs, Session, StatusResponse};
use crate::error::{Error, Result, SessionTask};
use crate::logging::Logger;
use crate::progress::{relay_to_display, ProgressDisplay};
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One batch in flight between the engine and the relay
const STATUS_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationState {
    Idle,
    Establishing,
    Running,
    Completed,
    Failed,
}

/// Cancellation scope with a single-writer slot for the first failure
struct TaskScope {
    token: CancellationToken,
    first_error: OnceLock<(SessionTask, Error)>,
}

impl TaskScope {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            first_error: OnceLock::new(),
        }
    }

    fn fail(&self, task: SessionTask, error: Error) {
        match self.first_error.set((task, error)) {
            Ok(()) => debug!(%task, "first task failure recorded, cancelling session scope"),
            Err((_, later)) => debug!(%task, error = %later, "ignoring later task failure"),
        }
        self.token.cancel();
    }

    async fn supervise<F>(&self, task: SessionTask, future: F)
    where
        F: Future<Output = Result<()>>,
    {
        match future.await {
            Ok(()) => debug!(%task, "session task finished"),
            Err(error) => self.fail(task, error),
        }
    }

    fn into_first_error(self) -> Option<(SessionTask, Error)> {
        self.first_error.into_inner()
    }
}

/// Runs one engine session as a supervised unit of three tasks
pub struct SessionOrchestrator {
    engine: Arc<dyn BuildEngine>,
    logger: Logger,
    state: Mutex<OrchestrationState>,
}

impl SessionOrchestrator {
    pub fn new(engine: Arc<dyn BuildEngine>, logger: Logger) -> Self {
        Self {
            engine,
            logger,
            state: Mutex::new(OrchestrationState::Idle),
        }
    }

    pub fn state(&self) -> OrchestrationState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, to: OrchestrationState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug!(from = ?*state, to = ?to, "session orchestration state change");
        *state = to;
    }

    /// Open a session exposing `local_dirs` to the engine
    pub async fn establish(
        &self,
        parent: &CancellationToken,
        local_dirs: LocalDirs,
    ) -> Result<Arc<dyn Session>> {
        self.transition(OrchestrationState::Establishing);
        let session = tokio::select! {
            session = self.engine.session(local_dirs) => session,
            _ = parent.cancelled() => Err(Error::Cancelled),
        };
        match session {
            Ok(session) => {
                self.logger.detail(&format!("Session {} established", session.id()));
                Ok(session)
            }
            Err(error) => {
                self.transition(OrchestrationState::Failed);
                Err(error)
            }
        }
    }

    /// Drive `session` with the transport, work and progress tasks.
    ///
    /// `work` receives the sending half of the status channel and must drop it once it
    /// has nothing more to report; that is what ends the progress task.
    pub async fn run<W, Fut>(
        &self,
        parent: &CancellationToken,
        session: Arc<dyn Session>,
        display: &mut dyn ProgressDisplay,
        work: W,
    ) -> Result<()>
    where
        W: FnOnce(mpsc::Sender<StatusResponse>) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        let session_id = session.id().to_string();
        self.transition(OrchestrationState::Running);

        let scope = TaskScope::new(parent.child_token());
        let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);

        let transport = async {
            tokio::select! {
                served = session.run() => served,
                _ = scope.token.cancelled() => Err(Error::Cancelled),
            }
        };

        let work = async {
            let result = tokio::select! {
                result = work(status_tx) => result,
                _ = scope.token.cancelled() => Err(Error::Cancelled),
            };
            // work completion releases the transport
            session.close().await;
            result
        };

        let progress = relay_to_display(status_rx, display, &scope.token);

        tokio::join!(
            scope.supervise(SessionTask::Transport, transport),
            scope.supervise(SessionTask::Work, work),
            scope.supervise(SessionTask::Progress, progress),
        );

        match scope.into_first_error() {
            None => {
                self.transition(OrchestrationState::Completed);
                Ok(())
            }
            Some((task, error)) => {
                self.transition(OrchestrationState::Failed);
                Err(Error::Orchestration {
                    session_id,
                    task,
                    source: Box::new(error),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ImageMetadata;
    use crate::progress::SolveStatus;
    use crate::solve::SolveRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct TestSession {
        closed: Notify,
        close_calls: AtomicUsize,
        fail_transport: bool,
        fail_on_release: bool,
    }

    #[async_trait]
    impl Session for TestSession {
        fn id(&self) -> &str {
            "test-session"
        }

        async fn run(&self) -> Result<()> {
            if self.fail_transport {
                return Err(Error::engine("transport", "connection reset"));
            }
            self.closed.notified().await;
            if self.fail_on_release {
                return Err(Error::engine("transport", "stream reset during shutdown"));
            }
            Ok(())
        }

        async fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.notify_one();
        }
    }

    struct NoEngine;

    #[async_trait]
    impl BuildEngine for NoEngine {
        async fn session(&self, _local_dirs: LocalDirs) -> Result<Arc<dyn Session>> {
            Err(Error::engine("session", "unavailable"))
        }

        async fn solve(&self, _: &str, _: SolveRequest, _: mpsc::Sender<StatusResponse>) -> Result<()> {
            unreachable!()
        }

        async fn image_metadata(&self, _: &str) -> Result<ImageMetadata> {
            unreachable!()
        }

        async fn push(&self, _: &str, _: &str, _: bool) -> Result<()> {
            unreachable!()
        }
    }

    struct Drain;

    #[async_trait]
    impl ProgressDisplay for Drain {
        async fn display(&mut self, mut updates: mpsc::Receiver<SolveStatus>) -> Result<()> {
            while updates.recv().await.is_some() {}
            Ok(())
        }
    }

    struct FailingDisplay;

    #[async_trait]
    impl ProgressDisplay for FailingDisplay {
        async fn display(&mut self, mut updates: mpsc::Receiver<SolveStatus>) -> Result<()> {
            updates.recv().await;
            Err(Error::Progress("terminal went away".to_string()))
        }
    }

    fn orchestrator() -> SessionOrchestrator {
        SessionOrchestrator::new(Arc::new(NoEngine), Logger::new_quiet())
    }

    #[tokio::test]
    async fn test_all_tasks_succeed() {
        let orch = orchestrator();
        let session = Arc::new(TestSession::default());

        orch.run(&CancellationToken::new(), session.clone(), &mut Drain, |status| async move {
            status.send(StatusResponse::default()).await.ok();
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(orch.state(), OrchestrationState::Completed);
        assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_work_success_with_progress_failure_fails_run() {
        let orch = orchestrator();
        let session = Arc::new(TestSession::default());

        let err = orch
            .run(&CancellationToken::new(), session.clone(), &mut FailingDisplay, |status| async move {
                let _ = status.send(StatusResponse::default()).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Orchestration { task: SessionTask::Progress, .. }
        ));
        assert_eq!(orch.state(), OrchestrationState::Failed);
        assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_cancels_pending_work() {
        let orch = orchestrator();
        let session = Arc::new(TestSession {
            fail_transport: true,
            ..Default::default()
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            orch.run(&CancellationToken::new(), session.clone(), &mut Drain, |_status| async move {
                std::future::pending::<()>().await;
                Ok(())
            }),
        )
        .await
        .expect("run should unwind after transport failure")
        .unwrap_err();

        match err {
            Error::Orchestration { task, source, .. } => {
                assert_eq!(task, SessionTask::Transport);
                assert!(matches!(*source, Error::Engine { operation: "transport", .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_after_work_success_fails_run() {
        let orch = orchestrator();
        let session = Arc::new(TestSession {
            fail_on_release: true,
            ..Default::default()
        });

        let err = orch
            .run(&CancellationToken::new(), session.clone(), &mut Drain, |status| async move {
                status.send(StatusResponse::default()).await.ok();
                Ok(())
            })
            .await
            .unwrap_err();

        match err {
            Error::Orchestration { task, source, .. } => {
                assert_eq!(task, SessionTask::Transport);
                assert!(matches!(*source, Error::Engine { operation: "transport", .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(orch.state(), OrchestrationState::Failed);
        assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_caller_cancellation_unblocks_all_tasks() {
        let orch = orchestrator();
        let session = Arc::new(TestSession::default());
        let parent = CancellationToken::new();

        let canceller = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            orch.run(&parent, session, &mut Drain, |_status| async move {
                std::future::pending::<()>().await;
                Ok(())
            }),
        )
        .await
        .expect("run should unwind after cancellation")
        .unwrap_err();

        assert!(matches!(err.root_cause(), Error::Cancelled));
    }

    #[tokio::test]
    async fn test_establish_failure_marks_failed() {
        let orch = orchestrator();
        let err = orch
            .establish(&CancellationToken::new(), LocalDirs::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Engine { operation: "session", .. }));
        assert_eq!(orch.state(), OrchestrationState::Failed);
    }
}
