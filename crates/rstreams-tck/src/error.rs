//! Violation and error types.

use std::time::Duration;

/// A protocol violation detected by the harness.
///
/// Violations seen on the test thread are returned as `Err(Violation)` and
/// fail the scenario immediately. Violations seen on other threads are
/// recorded in the [`ViolationLog`](crate::ViolationLog) and surface at the
/// next checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    /// An expected signal did not arrive in time.
    #[error("{message} (waited {timeout:?})")]
    Timeout { message: String, timeout: Duration },

    /// A signal arrived with the wrong value, kind or error type.
    #[error("{0}")]
    Mismatch(String),

    /// A second `on_complete`/`on_error` after the first terminal signal.
    #[error("{0}")]
    DoubleTerminal(String),

    /// `request`/`cancel` invoked synchronously from a terminal callback.
    #[error("{0}")]
    IllegalReentrancy(String),

    /// A second subscription accepted where it must be refused.
    #[error("{0}")]
    IllegalResubscription(String),

    /// More elements or demand than was granted.
    #[error("{0}")]
    Oversupply(String),

    /// Any other illegal call sequence.
    #[error("{0}")]
    Protocol(String),

    /// Violations collected off the test thread, reported at a checkpoint.
    #[error("{} asynchronous violation(s): {}", .0.len(), join(.0))]
    Async(Vec<Violation>),
}

impl Violation {
    pub fn timeout(message: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            message: message.into(),
            timeout,
        }
    }

    /// Short name of the violation kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Mismatch(_) => "mismatch",
            Self::DoubleTerminal(_) => "double-terminal",
            Self::IllegalReentrancy(_) => "illegal-reentrancy",
            Self::IllegalResubscription(_) => "illegal-resubscription",
            Self::Oversupply(_) => "oversupply",
            Self::Protocol(_) => "protocol",
            Self::Async(_) => "async",
        }
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure to write into a synchronization primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    /// The single-assignment slot or end-of-stream marker is already set.
    #[error("already completed")]
    AlreadyCompleted,
    /// The bounded queue is full.
    #[error("capacity of {0} exceeded")]
    Overflow(usize),
}
