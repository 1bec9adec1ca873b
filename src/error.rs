//! Error types for the Component Operator
//!
//! Provides structured error types for the reconciliation engine, the
//! state store, template rendering and the external systems that
//! individual pipeline stages talk to.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes / State Store Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Conflict updating {kind}/{name}: the object has been modified")]
    Conflict { kind: String, name: String },

    // =========================================================================
    // Engine Errors
    // =========================================================================
    #[error("{stage}: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Reconcile cancelled")]
    Cancelled,

    #[error("Reconcile deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    // =========================================================================
    // Template Errors
    // =========================================================================
    #[error("Template {template} failed: {reason}")]
    Template { template: String, reason: String },

    // =========================================================================
    // External System Errors
    // =========================================================================
    #[error("{service} request failed: {reason}")]
    External { service: String, reason: String },

    #[error("{service} rate limit exceeded")]
    Throttled { service: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No matching image tag for branch {branch}")]
    NoMatchingImage { branch: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Wrap an error with the name of the stage that produced it.
    ///
    /// Already-wrapped errors keep their original stage.
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage: stage.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Innermost error, looking through stage wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the stage this error was raised in, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            Error::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self.root() {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::Conflict { .. }
            | Error::Http(_)
            | Error::External { .. }
            | Error::Cancelled
            | Error::DeadlineExceeded(_) => ErrorAction::RequeueWithBackoff,

            // Throttled by the remote side - give it room
            Error::Throttled { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Waiting on something to show up
            Error::ResourceNotFound { .. } | Error::NoMatchingImage { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // Configuration/validation errors - only a spec change fixes these
            Error::Configuration(_) | Error::InvalidSpec(_) | Error::Template { .. } => {
                ErrorAction::NoRequeue
            }

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            Error::Kube(_)
                | Error::Conflict { .. }
                | Error::Http(_)
                | Error::External { .. }
                | Error::Throttled { .. }
                | Error::Cancelled
                | Error::DeadlineExceeded(_)
        )
    }

    /// Check if this is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Error::Conflict { .. })
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::Throttled {
            service: "rabbitmq".into(),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(30))
        );

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::Conflict {
            kind: "Secret".into(),
            name: "default/app".into(),
        };
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::Cancelled;
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let config_err = Error::InvalidSpec("missing field".into());
        assert!(!config_err.is_retryable());
        assert!(!config_err.is_transient());
    }

    #[test]
    fn test_stage_wrapping() {
        let err = Error::Conflict {
            kind: "Deployment".into(),
            name: "default/web".into(),
        }
        .in_stage("deployment");

        assert_eq!(err.stage(), Some("deployment"));
        assert!(err.is_conflict());
        assert!(err.is_transient());
        assert_eq!(
            err.to_string(),
            "deployment: Conflict updating Deployment/default/web: the object has been modified"
        );

        // Wrapping twice keeps the innermost stage
        let rewrapped = err.in_stage("other");
        assert_eq!(rewrapped.stage(), Some("deployment"));
    }
}
