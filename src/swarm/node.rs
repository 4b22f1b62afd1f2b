//! Swarm node model

use super::{null_default, ObjectVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Node role in the swarm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Worker node
    #[default]
    Worker,
    /// Manager node
    Manager,
}

/// Node state as reported by the managers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Node is unknown
    #[default]
    Unknown,
    /// Node is down
    Down,
    /// Node is ready
    Ready,
    /// Node is disconnected
    Disconnected,
}

/// Node availability for scheduling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAvailability {
    /// Node accepts tasks
    #[default]
    Active,
    /// Node keeps its tasks but accepts no new ones
    Pause,
    /// Node's tasks are rescheduled elsewhere
    Drain,
}

/// User-modifiable node attributes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub labels: HashMap<String, String>,
    pub role: NodeRole,
    pub availability: NodeAvailability,
}

/// Swarm node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    /// Node ID
    #[serde(rename = "ID")]
    pub id: String,
    /// Object version
    pub version: ObjectVersion,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Desired role and availability
    pub spec: NodeSpec,
    /// Host description
    #[serde(default)]
    pub description: NodeDescription,
    /// Observed status
    #[serde(default)]
    pub status: NodeStatus,
    /// Present on managers only
    #[serde(default)]
    pub manager_status: Option<ManagerStatus>,
}

impl Node {
    pub fn role(&self) -> NodeRole {
        self.spec.role
    }

    pub fn state(&self) -> NodeState {
        self.status.state
    }

    pub fn availability(&self) -> NodeAvailability {
        self.spec.availability
    }

    pub fn hostname(&self) -> &str {
        &self.description.hostname
    }

    /// Check if node is a manager
    pub fn is_manager(&self) -> bool {
        self.spec.role == NodeRole::Manager
    }

    /// Check if node is leader
    pub fn is_leader(&self) -> bool {
        self.manager_status
            .as_ref()
            .map(|s| s.leader)
            .unwrap_or(false)
    }

    /// Check if node is ready
    pub fn is_ready(&self) -> bool {
        self.status.state == NodeState::Ready
    }

    /// Check if node is available for scheduling
    pub fn is_available(&self) -> bool {
        self.is_ready() && self.spec.availability == NodeAvailability::Active
    }

    /// Host the node's engine can be reached on.
    ///
    /// Managers may report `0.0.0.0` as their status address; fall back to
    /// the host part of the manager address in that case.
    pub fn reachable_host(&self) -> Option<&str> {
        let addr = self.status.addr.as_str();
        if !addr.is_empty() && addr != "0.0.0.0" {
            return Some(addr);
        }
        self.manager_status
            .as_ref()
            .and_then(|m| m.addr.rsplit_once(':').map(|(host, _)| host))
            .filter(|host| !host.is_empty())
    }
}

/// Node description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeDescription {
    /// Hostname
    #[serde(default)]
    pub hostname: String,
    /// Platform info
    #[serde(default)]
    pub platform: Platform,
    /// Engine description
    #[serde(default)]
    pub engine: EngineDescription,
}

/// Platform information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Platform {
    /// CPU architecture
    #[serde(rename = "Architecture", default)]
    pub architecture: String,
    /// Operating system
    #[serde(rename = "OS", default)]
    pub os: String,
}

/// Engine description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EngineDescription {
    /// Engine version
    #[serde(default)]
    pub engine_version: String,
}

/// Manager status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagerStatus {
    /// Is leader
    #[serde(default)]
    pub leader: bool,
    /// Reachability
    pub reachability: String,
    /// Address
    pub addr: String,
}

/// Node status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeStatus {
    /// State
    pub state: NodeState,
    /// Message
    #[serde(default)]
    pub message: String,
    /// Address
    #[serde(default)]
    pub addr: String,
}
