//! swarm-converge - wait for a Docker Swarm to converge
//!
//! A client for Docker Engine endpoints in swarm mode built around a
//! reusable convergence poller:
//!
//! - Convergence polling with bounded attempts, backoff, deadlines and cancellation
//! - Best-effort cleanup that records failures instead of hiding them
//! - Swarm membership, services, tasks and overlay networks over the Engine API
//! - An end-to-end two-node reconciliation scenario

pub mod cleanup;
pub mod config;
pub mod error;
pub mod poll;
pub mod scenario;
pub mod swarm;

pub use error::{ConvergeError, Result};
