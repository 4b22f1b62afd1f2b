//! Best-effort cleanup
//!
//! Teardown steps (leaving a swarm, deleting a network that may already be
//! gone) must not stop the remaining steps, but their failures should still
//! be visible. [`CleanupReport`] runs each step, logs and records failures,
//! and never propagates them on its own.

use crate::error::{ConvergeError, Result};
use std::fmt::Display;
use std::future::Future;
use tracing::{debug, warn};

/// A cleanup step that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    /// Step name
    pub step: String,
    /// Rendered error
    pub error: String,
}

/// Outcome of a sequence of best-effort cleanup steps
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    succeeded: Vec<String>,
    failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Await `step`, recording its outcome. Returns the value on success.
    pub async fn run<T, E, Fut>(&mut self, step: impl Into<String>, fut: Fut) -> Option<T>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let step = step.into();
        match fut.await {
            Ok(value) => {
                debug!(step = %step, "Cleanup step succeeded");
                self.succeeded.push(step);
                Some(value)
            }
            Err(e) => {
                self.record_failure(step, e);
                None
            }
        }
    }

    /// Record a failure that happened outside [`CleanupReport::run`]
    pub fn record_failure(&mut self, step: impl Into<String>, error: impl Display) {
        let step = step.into();
        let error = error.to_string();
        warn!(step = %step, error = %error, "Cleanup step failed");
        self.failures.push(CleanupFailure { step, error });
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: CleanupReport) {
        self.succeeded.extend(other.succeeded);
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn succeeded(&self) -> &[String] {
        &self.succeeded
    }

    pub fn failures(&self) -> &[CleanupFailure] {
        &self.failures
    }

    /// Escalate recorded failures into [`ConvergeError::Cleanup`]
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        Err(ConvergeError::Cleanup(
            self.failures
                .into_iter()
                .map(|f| format!("{}: {}", f.step, f.error))
                .collect(),
        ))
    }
}
