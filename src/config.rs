//! Harness configuration
//!
//! Settings are layered: built-in defaults, then the YAML config file, then
//! environment variables, then command-line flags (applied by the binary).

use crate::error::{ConvergeError, Result};
use crate::poll::{Delay, MaxAttempts, PollConfig};
use crate::swarm::{Connection, ServiceSpec, DOCKER_API_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable holding the manager engine address
pub const ENV_MASTER_ADDRESS: &str = "SWARM_MASTER_ADDRESS";

/// Environment variable holding the worker engine address
pub const ENV_WORKER_ADDRESS: &str = "SWARM_WORKER_ADDRESS";

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Manager engine, e.g. `http://core-01:2375`
    pub master_address: Option<String>,
    /// Worker engine, e.g. `http://core-02:2375`
    pub worker_address: Option<String>,
    /// Engine API port used for discovered nodes
    pub docker_api_port: u16,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
    /// Retry settings for every wait
    pub poll: PollSettings,
    /// Service template (YAML or JSON); the built-in nginx template otherwise
    pub service_template: Option<PathBuf>,
    /// Replicas the scenario starts with
    pub replicas: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            master_address: None,
            worker_address: None,
            docker_api_port: DOCKER_API_PORT,
            request_timeout_secs: 30,
            poll: PollSettings::default(),
            service_template: None,
            replicas: 5,
        }
    }
}

/// Serializable form of [`PollConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Attempts per wait
    pub max_attempts: u32,
    /// Ignore `max_attempts`; needs a deadline or Ctrl-C to stop
    pub unbounded: bool,
    /// Fixed delay between attempts
    pub delay_ms: u64,
    /// Exponential backoff, replaces `delay_ms` when set
    pub backoff: Option<BackoffSettings>,
    /// Overall time limit per wait
    pub deadline_secs: Option<u64>,
    /// Abort a wait on the first failed request
    pub fail_fast: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_attempts: crate::poll::config::DEFAULT_MAX_ATTEMPTS,
            unbounded: false,
            delay_ms: crate::poll::config::DEFAULT_DELAY.as_millis() as u64,
            backoff: None,
            deadline_secs: None,
            fail_fast: false,
        }
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 10_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl PollSettings {
    /// Build and validate the poll configuration
    pub fn to_poll_config(&self) -> Result<PollConfig> {
        let delay = match &self.backoff {
            Some(b) => Delay::Exponential {
                initial: Duration::from_millis(b.initial_ms),
                multiplier: b.multiplier,
                max: Duration::from_millis(b.max_ms),
                jitter: b.jitter,
            },
            None => Delay::fixed(Duration::from_millis(self.delay_ms)),
        };
        let max_attempts = if self.unbounded {
            MaxAttempts::Unbounded
        } else {
            MaxAttempts::Bounded(self.max_attempts)
        };

        let mut config = PollConfig::default()
            .with_max_attempts(max_attempts)
            .with_delay(delay)
            .with_fail_fast(self.fail_fast);
        if let Some(secs) = self.deadline_secs {
            config = config.with_deadline(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }
}

impl HarnessConfig {
    /// `<config dir>/swarm-converge/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("swarm-converge").join("config.yaml"))
    }

    /// Load from `path`, or from the default location if it exists.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file just yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Parse YAML config
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `SWARM_MASTER_ADDRESS` / `SWARM_WORKER_ADDRESS`
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup(ENV_MASTER_ADDRESS).filter(|a| !a.is_empty()) {
            self.master_address = Some(addr);
        }
        if let Some(addr) = lookup(ENV_WORKER_ADDRESS).filter(|a| !a.is_empty()) {
            self.worker_address = Some(addr);
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Connection to the manager engine
    pub fn master(&self) -> Result<Connection> {
        let addr = self.master_address.as_deref().ok_or_else(|| {
            ConvergeError::InvalidConfig(format!(
                "no manager address configured; set {} or pass --master",
                ENV_MASTER_ADDRESS
            ))
        })?;
        Connection::with_timeout(addr, self.request_timeout())
    }

    /// Connection to the worker engine
    pub fn worker(&self) -> Result<Connection> {
        let addr = self.worker_address.as_deref().ok_or_else(|| {
            ConvergeError::InvalidConfig(format!(
                "no worker address configured; set {} or pass --worker",
                ENV_WORKER_ADDRESS
            ))
        })?;
        Connection::with_timeout(addr, self.request_timeout())
    }

    /// The configured service template, or the built-in one
    pub fn service_spec(&self) -> Result<ServiceSpec> {
        match &self.service_template {
            Some(path) => ServiceSpec::from_file(path),
            None => ServiceSpec::default_template(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.docker_api_port, 2375);
        assert_eq!(config.replicas, 5);

        let poll = config.poll.to_poll_config().unwrap();
        assert_eq!(poll.max_attempts(), MaxAttempts::Bounded(20));
        assert_eq!(poll.delay().for_attempt(7), Duration::from_secs(1));
        assert!(!poll.fail_fast());
    }

    #[test]
    fn test_load_file_with_partial_settings() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "master_address: http://core-01:2375\n\
             replicas: 3\n\
             poll:\n  \
               max_attempts: 40\n  \
               deadline_secs: 90\n  \
               backoff:\n    \
                 initial_ms: 250\n    \
                 jitter: false\n"
        )
        .unwrap();

        let config = HarnessConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.master_address.as_deref(), Some("http://core-01:2375"));
        assert_eq!(config.worker_address, None);
        assert_eq!(config.replicas, 3);
        assert_eq!(config.docker_api_port, 2375);

        let poll = config.poll.to_poll_config().unwrap();
        assert_eq!(poll.max_attempts(), MaxAttempts::Bounded(40));
        assert_eq!(poll.deadline(), Some(Duration::from_secs(90)));
        assert_eq!(poll.delay().for_attempt(1), Duration::from_millis(250));
        assert_eq!(poll.delay().for_attempt(3), Duration::from_millis(1000));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = HarnessConfig::load(Some(&dir.path().join("nope.yaml"))).unwrap_err();
        assert!(matches!(err, ConvergeError::Io(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config =
            HarnessConfig::from_yaml("master_address: http://from-file:2375\n").unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_MASTER_ADDRESS, "http://core-01:2375"),
            (ENV_WORKER_ADDRESS, ""),
        ]
        .into_iter()
        .collect();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.master_address.as_deref(), Some("http://core-01:2375"));
        assert_eq!(config.worker_address, None);
        assert_eq!(config.master().unwrap().host(), "core-01");

        let err = config.worker().unwrap_err();
        assert!(err.to_string().contains(ENV_WORKER_ADDRESS));
    }

    #[test]
    fn test_invalid_poll_settings_are_rejected() {
        let settings = PollSettings {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(
            settings.to_poll_config(),
            Err(ConvergeError::PollConfig(_))
        ));

        let unbounded = PollSettings {
            max_attempts: 0,
            unbounded: true,
            deadline_secs: Some(60),
            ..Default::default()
        };
        let poll = unbounded.to_poll_config().unwrap();
        assert_eq!(poll.max_attempts(), MaxAttempts::Unbounded);
    }

    #[test]
    fn test_custom_service_template() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "Name: web\nTaskTemplate:\n  ContainerSpec:\n    Image: httpd:2.4\nMode:\n  Replicated:\n    Replicas: 2\n"
        )
        .unwrap();

        let config = HarnessConfig {
            service_template: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let spec = config.service_spec().unwrap();
        assert_eq!(spec.name, "web");
        assert_eq!(spec.replicas(), Some(2));
        assert_eq!(HarnessConfig::default().service_spec().unwrap().name, "nginx");
    }
}
