//! Error types for Polyport Core
//!
//! Run-wide vs. unit-local failures:
//! - `PipelineError` aborts a run (malformed graph, invalid config, broken
//!   internal invariants)
//! - `OracleError` and `ToolError` stay local to one unit; the controller turns
//!   them into a `Failed` status or a failing verdict
//! - A unit ending in `Failed` is an expected outcome, not an error

use crate::unit::UnitStatus;
use polyport_graph::GraphError;
use std::time::Duration;

/// Run-wide error
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Dependency graph could not be built
    #[error("dependency graph error: {0}")]
    Graph(#[from] GraphError),

    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A unit state invariant was violated
    #[error("unit state error: {0}")]
    UnitState(#[from] UnitStateError),

    /// A worker task died
    #[error("worker failed: {0}")]
    Worker(String),

    /// Writing output failed
    #[error("output error: {0}")]
    Output(String),
}

impl PipelineError {
    /// Errors caused by bad input rather than by a bug
    #[inline]
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Graph(_) | Self::Config(_))
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// File could not be parsed
    #[error("failed to parse {format}: {message}")]
    Parse {
        /// Format name (yaml, toml, json)
        format: &'static str,
        /// Parser message
        message: String,
    },

    /// File could not be read or written
    #[error("io error on {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// OS message
        message: String,
    },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`]
    #[inline]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Failure reported by an oracle backend for a single request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Network-level or server-side failure
    #[error("transient failure: {0}")]
    Transient(String),

    /// Rate limit hit
    #[error("rate limited")]
    RateLimited {
        /// Server-provided wait time
        retry_after: Option<Duration>,
    },

    /// Request refused (bad credentials, malformed request)
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// Server-requested delay, if any
    #[inline]
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Oracle adapter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    /// Transient failures persisted past the retry bound
    #[error("oracle unavailable after {attempts} attempts: {last_error}")]
    Unavailable {
        /// Calls made
        attempts: u32,
        /// Last transport error
        last_error: String,
    },

    /// The backend refused the request
    #[error("oracle rejected request: {0}")]
    Rejected(String),

    /// No response within the per-call timeout
    #[error("oracle call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Prompt could not be rendered
    #[error("prompt error: {0}")]
    Prompt(#[from] PromptError),
}

impl OracleError {
    /// Timeouts count as a failed cycle; everything else fails the unit
    #[inline]
    #[must_use]
    pub fn is_cycle_failure(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Prompt rendering errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    /// Template name not registered
    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    /// A `{placeholder}` had no value
    #[error("template `{template}` is missing a value for `{placeholder}`")]
    MissingPlaceholder {
        /// Template name
        template: String,
        /// Placeholder name
        placeholder: String,
    },
}

/// A verification tool crashed instead of reporting findings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The tool could not be started
    #[error("failed to launch `{program}`: {reason}")]
    Launch {
        /// Program name
        program: String,
        /// OS error
        reason: String,
    },

    /// The tool ran but exited abnormally
    #[error("`{tool}` crashed: {detail}")]
    Crashed {
        /// Tool name
        tool: String,
        /// Exit status / stderr excerpt
        detail: String,
    },

    /// Scratch files could not be prepared
    #[error("workspace error: {0}")]
    Workspace(String),
}

/// Illegal unit state changes (controller bugs, never user errors)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitStateError {
    /// Transition not permitted by the state machine
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current status
        from: UnitStatus,
        /// Requested status
        to: UnitStatus,
    },

    /// Operation needs the unit to be in progress
    #[error("unit is {0:?}, expected InProgress")]
    NotInProgress(UnitStatus),

    /// Another attempt would exceed the iteration bound
    #[error("attempt bound of {max} reached")]
    AttemptBoundReached {
        /// Configured bound
        max: u32,
    },

    /// Convergence requested without a passing verdict
    #[error("cannot converge without a passing verdict")]
    NotPassing,

    /// A finished-run operation met a unit that is still open
    #[error("unit {file} is {status:?}, expected a terminal status")]
    NotTerminal {
        /// Unit file
        file: String,
        /// Its status
        status: UnitStatus,
    },

    /// A unit names a file the project does not contain
    #[error("unit {file} has no output address in the project")]
    UnknownFile {
        /// Unit file
        file: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_is_retryable() {
        assert!(TransportError::Transient("reset".into()).is_retryable());
        assert!(TransportError::RateLimited { retry_after: None }.is_retryable());
        assert!(!TransportError::Rejected("401".into()).is_retryable());
    }

    #[test]
    fn retry_after_only_for_rate_limit() {
        let limited = TransportError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(TransportError::Transient("x".into()).retry_after(), None);
    }

    #[test]
    fn oracle_timeout_is_cycle_failure() {
        assert!(OracleError::Timeout(Duration::from_secs(1)).is_cycle_failure());
        assert!(!OracleError::Rejected("nope".into()).is_cycle_failure());
        assert!(OracleError::Timeout(Duration::from_millis(1500))
            .to_string()
            .contains("1500ms"));
    }

    #[test]
    fn pipeline_error_classification() {
        let graph = PipelineError::from(GraphError::UnknownFile {
            file: "x".into(),
            referenced_by: None,
        });
        assert!(graph.is_input_error());
        assert!(!PipelineError::Worker("panic".into()).is_input_error());
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::invalid("concurrency", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid value for `concurrency`: must be at least 1"
        );
    }
}
