//! Poll configuration
//!
//! A [`PollConfig`] is built once and handed to every wait that should share
//! the same retry budget. It is never mutated while a poll runs.

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Attempts before a wait gives up on its condition
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Pause between attempts
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Rejected poll configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("max attempts must be at least 1 when bounded")]
    ZeroAttempts,

    #[error("backoff multiplier must be finite and >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("backoff cap {max:?} is shorter than the initial delay {initial:?}")]
    CapBelowInitial { initial: Duration, max: Duration },

    #[error("deadline must be greater than zero")]
    ZeroDeadline,
}

/// Upper bound on the number of attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAttempts {
    /// Stop after this many attempts
    Bounded(u32),
    /// Keep polling until convergence, cancellation or the deadline
    Unbounded,
}

impl MaxAttempts {
    /// Whether `attempts` completed attempts use up the budget
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        match self {
            MaxAttempts::Bounded(max) => attempts >= *max,
            MaxAttempts::Unbounded => false,
        }
    }
}

/// Wait between two attempts
#[derive(Clone)]
pub enum Delay {
    /// Same pause after every attempt
    Fixed(Duration),
    /// `initial * multiplier^(attempt - 1)`, capped at `max`
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
        /// Scale each delay by a random factor in `0.5..1.5`
        jitter: bool,
    },
    /// Caller-supplied function of the 1-based attempt index
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Delay {
    /// No pause at all
    pub fn none() -> Self {
        Delay::Fixed(Duration::ZERO)
    }

    /// Fixed pause
    pub fn fixed(delay: Duration) -> Self {
        Delay::Fixed(delay)
    }

    /// Doubling backoff without jitter
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Delay::Exponential {
            initial,
            multiplier: 2.0,
            max,
            jitter: false,
        }
    }

    /// Backoff computed by `f(attempt)`
    pub fn custom(f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Delay::Custom(Arc::new(f))
    }

    /// Enable jitter on an exponential delay. Other strategies are returned unchanged.
    pub fn with_jitter(self) -> Self {
        match self {
            Delay::Exponential {
                initial,
                multiplier,
                max,
                ..
            } => Delay::Exponential {
                initial,
                multiplier,
                max,
                jitter: true,
            },
            other => other,
        }
    }

    /// Delay to wait after the given 1-based attempt
    pub fn for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Delay::Fixed(delay) => *delay,
            Delay::Exponential {
                initial,
                multiplier,
                max,
                jitter,
            } => {
                let exponent = attempt.saturating_sub(1).min(1024) as i32;
                let mut secs = initial.as_secs_f64() * multiplier.powi(exponent);
                if *jitter {
                    secs *= rand::thread_rng().gen_range(0.5..1.5);
                }
                // Too large (or NaN) for a Duration means past the cap anyway
                Duration::try_from_secs_f64(secs).map_or(*max, |d| d.min(*max))
            }
            Delay::Custom(f) => f(attempt),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Delay::Exponential {
            initial,
            multiplier,
            max,
            ..
        } = self
        {
            if !multiplier.is_finite() || *multiplier < 1.0 {
                return Err(ConfigError::InvalidMultiplier(*multiplier));
            }
            if max < initial {
                return Err(ConfigError::CapBelowInitial {
                    initial: *initial,
                    max: *max,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delay::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Delay::Exponential {
                initial,
                multiplier,
                max,
                jitter,
            } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("max", max)
                .field("jitter", jitter)
                .finish(),
            Delay::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Immutable poll configuration
#[derive(Debug, Clone)]
pub struct PollConfig {
    max_attempts: MaxAttempts,
    delay: Delay,
    deadline: Option<Duration>,
    fail_fast: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: MaxAttempts::Bounded(DEFAULT_MAX_ATTEMPTS),
            delay: Delay::Fixed(DEFAULT_DELAY),
            deadline: None,
            fail_fast: false,
        }
    }
}

impl PollConfig {
    /// Bounded attempts with a fixed delay
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: MaxAttempts::Bounded(max_attempts),
            delay: Delay::Fixed(delay),
            ..Default::default()
        }
    }

    /// Unbounded attempts with a fixed delay. Pair with a deadline or a
    /// cancellation token.
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: MaxAttempts::Unbounded,
            delay: Delay::Fixed(delay),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: MaxAttempts) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort on the first observation error instead of retrying it
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn max_attempts(&self) -> MaxAttempts {
        self.max_attempts
    }

    pub fn delay(&self) -> &Delay {
        &self.delay
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// Check the configuration before any attempt runs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == MaxAttempts::Bounded(0) {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroDeadline);
        }
        self.delay.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_twenty_attempts_one_second_apart() {
        let config = PollConfig::default();
        assert_eq!(config.max_attempts(), MaxAttempts::Bounded(20));
        assert_eq!(config.delay().for_attempt(1), Duration::from_secs(1));
        assert!(config.deadline().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let config = PollConfig::new(0, Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroAttempts));
    }

    #[test]
    fn test_rejects_zero_deadline() {
        let config = PollConfig::default().with_deadline(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroDeadline));
    }

    #[test]
    fn test_rejects_bad_backoff() {
        let shrinking = PollConfig::default().with_delay(Delay::Exponential {
            initial: Duration::from_millis(100),
            multiplier: 0.5,
            max: Duration::from_secs(1),
            jitter: false,
        });
        assert_eq!(
            shrinking.validate(),
            Err(ConfigError::InvalidMultiplier(0.5))
        );

        let capped = PollConfig::default().with_delay(Delay::exponential(
            Duration::from_secs(2),
            Duration::from_secs(1),
        ));
        assert!(matches!(
            capped.validate(),
            Err(ConfigError::CapBelowInitial { .. })
        ));
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let delay = Delay::exponential(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(delay.for_attempt(1), Duration::from_millis(100));
        assert_eq!(delay.for_attempt(2), Duration::from_millis(200));
        assert_eq!(delay.for_attempt(3), Duration::from_millis(400));
        assert_eq!(delay.for_attempt(4), Duration::from_millis(500));
        assert_eq!(delay.for_attempt(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_unbounded_cap_saturates() {
        let delay = Delay::exponential(Duration::from_secs(1), Duration::MAX);
        assert_eq!(delay.for_attempt(3), Duration::from_secs(4));
        assert_eq!(delay.for_attempt(80), Duration::MAX);
        assert_eq!(delay.for_attempt(u32::MAX), Duration::MAX);

        let jittered = delay.with_jitter();
        assert_eq!(jittered.for_attempt(2000), Duration::MAX);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let delay =
            Delay::exponential(Duration::from_millis(100), Duration::from_secs(10)).with_jitter();
        for _ in 0..50 {
            let d = delay.for_attempt(2);
            assert!(d >= Duration::from_millis(99));
            assert!(d <= Duration::from_millis(301));
        }
    }

    #[test]
    fn test_custom_delay() {
        let delay = Delay::custom(|attempt| Duration::from_millis(attempt as u64 * 10));
        assert_eq!(delay.for_attempt(3), Duration::from_millis(30));
        assert_eq!(format!("{:?}", delay), "Custom(..)");
    }

    #[test]
    fn test_unbounded_never_exhausts() {
        assert!(!MaxAttempts::Unbounded.is_exhausted(u32::MAX));
        assert!(MaxAttempts::Bounded(3).is_exhausted(3));
        assert!(!MaxAttempts::Bounded(3).is_exhausted(2));
    }
}
