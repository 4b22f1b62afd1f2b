//! Docker Swarm client
//!
//! Talks to Docker Engine endpoints in swarm mode: cluster membership,
//! services, tasks and overlay networks. Every call is a single remote
//! request; nothing is cached beyond the node connection map held by
//! [`Swarm`].

pub mod cluster;
pub mod connection;
pub mod expect;
pub mod network;
pub mod node;
pub mod service;
pub mod task;

pub use cluster::{DiscoverOptions, InitOptions, JoinTokens, Swarm, TokenType};
pub use connection::Connection;
pub use network::Network;
pub use node::{Node, NodeAvailability, NodeRole, NodeState};
pub use service::{Service, ServiceMode, ServiceSpec};
pub use task::{Task, TaskState};

use serde::{Deserialize, Deserializer, Serialize};

/// Port the swarm control plane listens on
pub const SWARM_PORT: u16 = 2377;

/// Plain-HTTP Docker Engine port
pub const DOCKER_API_PORT: u16 = 2375;

/// Object version, required for optimistic updates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectVersion {
    pub index: u64,
}

/// The engine sends `null` for empty lists and maps in several places
pub(crate) fn null_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
