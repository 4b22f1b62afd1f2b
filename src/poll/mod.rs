//! Convergence polling
//!
//! Observe an eventually-consistent remote system until a condition holds.
//!
//! ```ignore
//! let config = PollConfig::new(20, Duration::from_secs(1));
//! let tasks = Poller::new(config)
//!     .named("running tasks")
//!     .run(|| swarm.tasks(), expect::tasks_running(5))
//!     .await?
//!     .into_result("running tasks")?;
//! ```

pub mod config;
pub mod poller;
pub mod result;

pub use config::{ConfigError, Delay, MaxAttempts, PollConfig};
pub use poller::{poll, Poller};
pub use result::{AbortReason, Attempt, AttemptOutcome, PollResult};
