//! Convergence poller
//!
//! Repeatedly observes remote state and stops on the first snapshot that
//! satisfies a predicate. Observation errors count as unsatisfied attempts
//! unless the config asks to fail fast. Running out of attempts or time is a
//! normal outcome ([`PollResult::TimedOut`]), not an error.

use super::config::{ConfigError, PollConfig};
use super::result::{AbortReason, Attempt, AttemptOutcome, PollResult};
use chrono::Utc;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type AttemptHook = Arc<dyn Fn(&Attempt) + Send + Sync>;

/// How the wait between two attempts ended
enum Wait {
    Elapsed,
    Cancelled,
    DeadlineReached,
}

/// A named, reusable poll runner
#[derive(Clone)]
pub struct Poller {
    name: String,
    config: PollConfig,
    cancel: CancellationToken,
    on_attempt: Option<AttemptHook>,
}

impl Poller {
    /// Create a poller that is never cancelled
    pub fn new(config: PollConfig) -> Self {
        Self {
            name: "poll".to_string(),
            config,
            cancel: CancellationToken::new(),
            on_attempt: None,
        }
    }

    /// Name used in log fields
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stop with [`AbortReason::Cancelled`] once `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Called after every attempt, in order
    pub fn on_attempt(mut self, hook: impl Fn(&Attempt) + Send + Sync + 'static) -> Self {
        self.on_attempt = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll until `predicate` holds on a snapshot returned by `observe`.
    ///
    /// The configuration is validated first; an invalid one is returned as
    /// [`ConfigError`] without calling `observe`. An in-flight observation is
    /// never interrupted, cancellation is checked before each attempt and
    /// during the delay.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        mut observe: F,
        predicate: P,
    ) -> Result<PollResult<T, E>, ConfigError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&T) -> bool,
        E: Display,
    {
        self.config.validate()?;

        let start = Instant::now();
        // A deadline past the end of the clock never fires
        let deadline = self.config.deadline().and_then(|d| start.checked_add(d));
        let mut attempts = 0u32;
        let mut last_value: Option<T> = None;
        let mut last_error: Option<E> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.aborted(AbortReason::Cancelled, attempts, start));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(self.timed_out(last_value, last_error, attempts, start));
            }

            attempts += 1;
            let outcome = match observe().await {
                Ok(value) => {
                    if predicate(&value) {
                        self.record(attempts, start, AttemptOutcome::Satisfied);
                        let elapsed = start.elapsed();
                        info!(
                            poll = %self.name,
                            attempts,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Converged"
                        );
                        return Ok(PollResult::Converged {
                            value,
                            attempts,
                            elapsed,
                        });
                    }
                    last_value = Some(value);
                    AttemptOutcome::Unsatisfied
                }
                Err(err) => {
                    let message = err.to_string();
                    if self.config.fail_fast() {
                        self.record(attempts, start, AttemptOutcome::ObservationFailed(message));
                        return Ok(self.aborted(AbortReason::FailFast(err), attempts, start));
                    }
                    last_error = Some(err);
                    AttemptOutcome::ObservationFailed(message)
                }
            };
            self.record(attempts, start, outcome);

            if self.cancel.is_cancelled() {
                return Ok(self.aborted(AbortReason::Cancelled, attempts, start));
            }
            if self.config.max_attempts().is_exhausted(attempts) {
                return Ok(self.timed_out(last_value, last_error, attempts, start));
            }

            let delay = self.config.delay().for_attempt(attempts);
            match self.wait(delay, deadline).await {
                Wait::Elapsed => {}
                Wait::Cancelled => {
                    return Ok(self.aborted(AbortReason::Cancelled, attempts, start));
                }
                Wait::DeadlineReached => {
                    return Ok(self.timed_out(last_value, last_error, attempts, start));
                }
            }
        }
    }

    async fn wait(&self, delay: Duration, deadline: Option<Instant>) -> Wait {
        if delay.is_zero() {
            // Still give other tasks (and cancellers) a chance to run.
            tokio::task::yield_now().await;
            return Wait::Elapsed;
        }

        let deadline_reached = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Wait::Cancelled,
            _ = deadline_reached => Wait::DeadlineReached,
            _ = tokio::time::sleep(delay) => Wait::Elapsed,
        }
    }

    fn record(&self, index: u32, start: Instant, outcome: AttemptOutcome) {
        let attempt = Attempt {
            index,
            at: Utc::now(),
            elapsed: start.elapsed(),
            outcome,
        };

        match &attempt.outcome {
            AttemptOutcome::ObservationFailed(e) => warn!(
                poll = %self.name,
                attempt = index,
                error = %e,
                "Observation failed"
            ),
            outcome => debug!(
                poll = %self.name,
                attempt = index,
                elapsed_ms = attempt.elapsed.as_millis() as u64,
                %outcome,
                "Attempt finished"
            ),
        }

        if let Some(hook) = &self.on_attempt {
            hook(&attempt);
        }
    }

    fn timed_out<T, E: Display>(
        &self,
        last_value: Option<T>,
        last_error: Option<E>,
        attempts: u32,
        start: Instant,
    ) -> PollResult<T, E> {
        let elapsed = start.elapsed();
        warn!(
            poll = %self.name,
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            last_error = ?last_error.as_ref().map(|e| e.to_string()),
            "Gave up waiting for convergence"
        );
        PollResult::TimedOut {
            last_value,
            attempts,
            elapsed,
            last_error,
        }
    }

    fn aborted<T, E: Display>(
        &self,
        reason: AbortReason<E>,
        attempts: u32,
        start: Instant,
    ) -> PollResult<T, E> {
        info!(poll = %self.name, attempts, %reason, "Poll aborted");
        PollResult::Aborted {
            reason,
            attempts,
            elapsed: start.elapsed(),
        }
    }
}

/// Free-function form of [`Poller::run`]
pub async fn poll<T, E, F, Fut, P>(
    observe: F,
    predicate: P,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<PollResult<T, E>, ConfigError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
    E: Display,
{
    Poller::new(config.clone())
        .with_cancellation(cancel.clone())
        .run(observe, predicate)
        .await
}
