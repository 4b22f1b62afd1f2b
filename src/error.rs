//! Error types for swarm-converge

use std::time::Duration;
use thiserror::Error;

/// Result type for swarm-converge operations
pub type Result<T> = std::result::Result<T, ConvergeError>;

/// swarm-converge error types
#[derive(Error, Debug)]
pub enum ConvergeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Engine API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Swarm error: {0}")]
    Swarm(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid poll configuration: {0}")]
    PollConfig(#[from] crate::poll::ConfigError),

    #[error("{name} did not converge after {attempts} attempts in {elapsed:?}{}", last_error_suffix(.last_error))]
    NotConverged {
        name: String,
        attempts: u32,
        elapsed: Duration,
        last_error: Option<String>,
    },

    #[error("{name} aborted: {reason}")]
    Aborted { name: String, reason: String },

    #[error("Cleanup failed for {} step(s): {}", .0.len(), .0.join("; "))]
    Cleanup(Vec<String>),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {})", e),
        None => String::new(),
    }
}

impl ConvergeError {
    /// Whether the engine answered with the given HTTP status
    pub fn is_status(&self, status: u16) -> bool {
        matches!(self, ConvergeError::Api { status: s, .. } if *s == status)
    }
}
