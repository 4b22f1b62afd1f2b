//! Attempt records and terminal poll outcomes

use crate::error::{ConvergeError, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Outcome of a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Predicate held on the snapshot
    Satisfied,
    /// Snapshot observed but the predicate did not hold
    Unsatisfied,
    /// Observation failed with the given message
    ObservationFailed(String),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Satisfied => write!(f, "satisfied"),
            AttemptOutcome::Unsatisfied => write!(f, "unsatisfied"),
            AttemptOutcome::ObservationFailed(e) => write!(f, "observation failed: {}", e),
        }
    }
}

/// One observe + predicate cycle
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based ordinal
    pub index: u32,
    /// Wall-clock time the attempt finished
    pub at: DateTime<Utc>,
    /// Time since the poll started
    pub elapsed: Duration,
    /// Outcome
    pub outcome: AttemptOutcome,
}

/// Why a poll stopped before converging or timing out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason<E> {
    /// The caller's cancellation token fired
    Cancelled,
    /// An observation failed under a fail-fast configuration
    FailFast(E),
}

impl<E: fmt::Display> fmt::Display for AbortReason<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::FailFast(e) => write!(f, "observation failed: {}", e),
        }
    }
}

/// Terminal outcome of a poll sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult<T, E> {
    /// The predicate held; `value` is the snapshot it held on
    Converged {
        value: T,
        attempts: u32,
        elapsed: Duration,
    },
    /// Attempts or the deadline ran out
    TimedOut {
        last_value: Option<T>,
        attempts: u32,
        elapsed: Duration,
        last_error: Option<E>,
    },
    /// Stopped on request
    Aborted {
        reason: AbortReason<E>,
        attempts: u32,
        elapsed: Duration,
    },
}

impl<T, E> PollResult<T, E> {
    pub fn is_converged(&self) -> bool {
        matches!(self, PollResult::Converged { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, PollResult::TimedOut { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, PollResult::Aborted { .. })
    }

    /// Number of observations made
    pub fn attempts(&self) -> u32 {
        match self {
            PollResult::Converged { attempts, .. }
            | PollResult::TimedOut { attempts, .. }
            | PollResult::Aborted { attempts, .. } => *attempts,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            PollResult::Converged { elapsed, .. }
            | PollResult::TimedOut { elapsed, .. }
            | PollResult::Aborted { elapsed, .. } => *elapsed,
        }
    }

    /// The converged snapshot, if any
    pub fn value(&self) -> Option<&T> {
        match self {
            PollResult::Converged { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Escalate anything but convergence into an error. `name` describes the
    /// awaited condition in the error message.
    pub fn into_result(self, name: &str) -> Result<T>
    where
        E: fmt::Display,
    {
        match self {
            PollResult::Converged { value, .. } => Ok(value),
            PollResult::TimedOut {
                attempts,
                elapsed,
                last_error,
                ..
            } => Err(ConvergeError::NotConverged {
                name: name.to_string(),
                attempts,
                elapsed,
                last_error: last_error.map(|e| e.to_string()),
            }),
            PollResult::Aborted { reason, .. } => Err(ConvergeError::Aborted {
                name: name.to_string(),
                reason: reason.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converged_into_result() {
        let result: PollResult<u32, String> = PollResult::Converged {
            value: 5,
            attempts: 2,
            elapsed: Duration::from_secs(1),
        };
        assert!(result.is_converged());
        assert_eq!(result.value(), Some(&5));
        assert_eq!(result.into_result("tasks").unwrap(), 5);
    }

    #[test]
    fn test_timed_out_carries_last_error() {
        let result: PollResult<u32, String> = PollResult::TimedOut {
            last_value: None,
            attempts: 3,
            elapsed: Duration::from_secs(2),
            last_error: Some("connection refused".to_string()),
        };
        assert_eq!(result.attempts(), 3);
        assert!(result.value().is_none());

        let err = result.into_result("running tasks").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("running tasks did not converge after 3 attempts"));
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn test_aborted_into_result() {
        let result: PollResult<u32, String> = PollResult::Aborted {
            reason: AbortReason::Cancelled,
            attempts: 0,
            elapsed: Duration::ZERO,
        };
        assert!(result.is_aborted());
        let err = result.into_result("nodes").unwrap_err();
        assert_eq!(err.to_string(), "nodes aborted: cancelled");
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(AttemptOutcome::Satisfied.to_string(), "satisfied");
        assert_eq!(
            AttemptOutcome::ObservationFailed("503".to_string()).to_string(),
            "observation failed: 503"
        );
    }
}
