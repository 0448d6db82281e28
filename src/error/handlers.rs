//! Classification and unwrapping of pipeline errors

use super::{BuildPhase, Error};

impl Error {
    pub fn engine(operation: &'static str, message: impl Into<String>) -> Self {
        Error::Engine {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn in_phase(self, phase: BuildPhase) -> Self {
        Error::Build {
            phase,
            source: Box::new(self),
        }
    }

    /// Phase tag of a top-level build error
    pub fn phase(&self) -> Option<BuildPhase> {
        match self {
            Error::Build { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Innermost error, unwrapping build and orchestration wrappers
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Build { source, .. } | Error::Orchestration { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Transient infrastructure failures a caller may retry
    pub fn is_retryable(&self) -> bool {
        match self.root_cause() {
            Error::Fetch { .. } | Error::ImageInspection { .. } | Error::Engine { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionTask;

    #[test]
    fn test_root_cause_unwraps_nested_wrappers() {
        let err = Error::Orchestration {
            session_id: "abc".to_string(),
            task: SessionTask::Progress,
            source: Box::new(Error::engine("solve", "boom")),
        }
        .in_phase(BuildPhase::Solve);

        assert_eq!(err.phase(), Some(BuildPhase::Solve));
        assert!(matches!(err.root_cause(), Error::Engine { operation: "solve", .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_policy_and_input_errors_are_permanent() {
        let too_large = Error::ImageTooLarge {
            image: "r/a:latest".to_string(),
            actual: 100,
            limit: 50,
        };
        assert!(!too_large.is_retryable());
        assert!(!Error::UnsafeArchiveEntry { entry: "../x".to_string() }.is_retryable());
        assert!(!Error::Cancelled.in_phase(BuildPhase::Fetch).is_retryable());
    }
}
