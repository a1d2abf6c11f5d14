//! Error types for the research loop
//!
//! `ResearchError` covers everything the orchestrator, the state container and
//! the results store can report. `ServiceError` is what the generative and
//! retrieval services hand back to the stages that call them.

use std::time::Duration;
use thiserror::Error;

use crate::stages::StageKind;

/// Errors that can occur while validating, running or recording a research run
#[derive(Debug, Error)]
pub enum ResearchError {
    /// A stage could not produce a valid partial update
    #[error("Stage {stage} failed: {message}")]
    StageFailure {
        stage: StageKind,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A stage invocation exceeded its configured timeout
    #[error("Stage {stage} timed out after {timeout:?}")]
    StageTimeout { stage: StageKind, timeout: Duration },

    /// A stage kept failing after every permitted retry
    #[error("Stage {stage} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        stage: StageKind,
        attempts: u32,
        message: String,
    },

    /// Unknown state field, illegal update, or invalid router/engine settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller-supplied run parameters failed shape checks
    #[error("Validation error: {0}")]
    Validation(String),

    /// Run was cancelled between stages
    #[error("Run {run_id} cancelled before stage {stage}")]
    Cancelled { run_id: String, stage: StageKind },

    /// Results store read or write failed
    #[error("Results store error: {0}")]
    Store(String),
}

impl ResearchError {
    /// Create a stage failure with a message
    pub fn stage_failure(stage: StageKind, message: impl Into<String>) -> Self {
        Self::StageFailure {
            stage,
            message: message.into(),
            source: None,
        }
    }

    /// Create a stage failure with source
    pub fn stage_failure_with_source(
        stage: StageKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StageFailure {
            stage,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a results store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Stage the error belongs to, if any
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            ResearchError::StageFailure { stage, .. }
            | ResearchError::StageTimeout { stage, .. }
            | ResearchError::RetriesExhausted { stage, .. }
            | ResearchError::Cancelled { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether the orchestrator may retry the failed stage
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ResearchError::StageFailure { .. } | ResearchError::StageTimeout { .. }
        )
    }

    /// Whether the error counts as a stage failure for run bookkeeping
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            ResearchError::StageFailure { .. }
                | ResearchError::StageTimeout { .. }
                | ResearchError::RetriesExhausted { .. }
        )
    }
}

/// Errors returned by the generative and retrieval services
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited - too many requests")]
    RateLimited,

    #[error("Unauthorized - check credentials")]
    Unauthorized,

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl ServiceError {
    /// Check if this error is transient
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Unavailable(_) | ServiceError::Timeout | ServiceError::RateLimited
        )
    }
}

#[cfg(test)]
mod tests {
    // Ensure errors are Send + Sync (compile-time check)
    static_assertions::assert_impl_all!(super::ResearchError: Send, Sync);
    static_assertions::assert_impl_all!(super::ServiceError: Send, Sync, Clone);
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResearchError::stage_failure(StageKind::Grade, "score 120 out of range");
        assert_eq!(format!("{}", err), "Stage grade failed: score 120 out of range");

        let err = ResearchError::configuration("unknown state field `foo`");
        assert_eq!(
            format!("{}", err),
            "Configuration error: unknown state field `foo`"
        );
    }

    #[test]
    fn test_stage_failure_with_source() {
        let err = ResearchError::stage_failure_with_source(
            StageKind::Research,
            "retrieval failed",
            ServiceError::Timeout,
        );
        match err {
            ResearchError::StageFailure {
                stage,
                message,
                source,
            } => {
                assert_eq!(stage, StageKind::Research);
                assert_eq!(message, "retrieval failed");
                assert!(source.is_some());
            }
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_is_recoverable() {
        assert!(ResearchError::stage_failure(StageKind::Plan, "x").is_recoverable());
        assert!(ResearchError::StageTimeout {
            stage: StageKind::Write,
            timeout: Duration::from_secs(1),
        }
        .is_recoverable());
        assert!(!ResearchError::RetriesExhausted {
            stage: StageKind::Write,
            attempts: 3,
            message: "x".into(),
        }
        .is_recoverable());
        assert!(!ResearchError::configuration("x").is_recoverable());
        assert!(!ResearchError::validation("x").is_recoverable());
    }

    #[test]
    fn test_stage_accessor() {
        let err = ResearchError::Cancelled {
            run_id: "r1".into(),
            stage: StageKind::Grade,
        };
        assert_eq!(err.stage(), Some(StageKind::Grade));
        assert!(!err.is_stage_failure());
        assert_eq!(ResearchError::store("down").stage(), None);
    }

    #[test]
    fn test_service_error_retryable() {
        assert!(ServiceError::Timeout.is_retryable());
        assert!(ServiceError::RateLimited.is_retryable());
        assert!(ServiceError::Unavailable("503".into()).is_retryable());
        assert!(!ServiceError::Unauthorized.is_retryable());
        assert!(!ServiceError::Malformed("bad json".into()).is_retryable());
    }
}
