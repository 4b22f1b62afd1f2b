//! Swarm service model
//!
//! Specs serialize to the Engine API's PascalCase JSON and can be loaded
//! from YAML or JSON templates. Durations in specs are nanoseconds, as the
//! engine expects.

use super::{null_default, ObjectVersion};
use crate::error::{ConvergeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Built-in service template: nginx, three replicas, port 8181 published
pub const DEFAULT_TEMPLATE: &str = include_str!("../../templates/nginx-service.yaml");

/// Swarm service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Service {
    /// Service ID
    #[serde(rename = "ID")]
    pub id: String,
    /// Service version
    pub version: ObjectVersion,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Service specification
    pub spec: ServiceSpec,
    /// Service endpoint
    #[serde(default)]
    pub endpoint: Endpoint,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Get replica count
    pub fn replicas(&self) -> Option<u64> {
        self.spec.replicas()
    }

    /// Networks the service is attached to, as assigned on its endpoint.
    ///
    /// The endpoint is filled in asynchronously after creation, so a freshly
    /// created service may report none yet.
    pub fn network_ids(&self) -> Vec<&str> {
        self.endpoint
            .virtual_ips
            .iter()
            .map(|vip| vip.network_id.as_str())
            .collect()
    }
}

/// Service specification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSpec {
    /// Service name
    pub name: String,
    /// Labels
    #[serde(default, deserialize_with = "null_default")]
    pub labels: HashMap<String, String>,
    /// Task template
    #[serde(default)]
    pub task_template: TaskSpec,
    /// Service mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ServiceMode>,
    /// Update config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_config: Option<UpdateConfig>,
    /// Networks (older engines read them here rather than from the task template)
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachmentConfig>,
    /// Endpoint specification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_spec: Option<EndpointSpec>,
}

impl ServiceSpec {
    /// Parse a YAML (or JSON) service template
    pub fn from_yaml(content: &str) -> Result<Self> {
        let spec: ServiceSpec = serde_yaml::from_str(content)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Load a service template from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// The built-in nginx template
    pub fn default_template() -> Result<Self> {
        Self::from_yaml(DEFAULT_TEMPLATE)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConvergeError::InvalidConfig(
                "service template has no Name".to_string(),
            ));
        }
        if self.task_template.container_spec.is_none() {
            return Err(ConvergeError::InvalidConfig(format!(
                "service template {} has no TaskTemplate.ContainerSpec",
                self.name
            )));
        }
        Ok(())
    }

    /// Get replica count; `None` for global services
    pub fn replicas(&self) -> Option<u64> {
        match &self.mode {
            Some(ServiceMode {
                replicated: Some(mode),
                ..
            }) => Some(mode.replicas),
            Some(ServiceMode {
                global: Some(_), ..
            }) => None,
            _ => Some(1),
        }
    }

    /// Set the replica count, switching the service to replicated mode
    pub fn set_replicas(&mut self, replicas: u64) {
        self.mode = Some(ServiceMode::replicated(replicas));
    }

    /// Attach the service to a network, in both places engines read it from
    pub fn attach_network(&mut self, network_id: &str) {
        let attachment = NetworkAttachmentConfig {
            target: network_id.to_string(),
            aliases: Vec::new(),
        };
        if !self.networks.iter().any(|n| n.target == network_id) {
            self.networks.push(attachment.clone());
        }
        if !self
            .task_template
            .networks
            .iter()
            .any(|n| n.target == network_id)
        {
            self.task_template.networks.push(attachment);
        }
    }

    /// Publish a TCP port
    pub fn publish_port(&mut self, published: u16, target: u16) {
        let endpoint = self.endpoint_spec.get_or_insert_with(EndpointSpec::default);
        endpoint.ports.retain(|p| p.published_port != Some(published));
        endpoint.ports.push(PortConfig {
            name: None,
            protocol: Some("tcp".to_string()),
            target_port: target,
            published_port: Some(published),
            publish_mode: None,
        });
    }
}

/// Task specification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskSpec {
    /// Container spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_spec: Option<ContainerSpec>,
    /// Resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    /// Placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    /// Networks
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachmentConfig>,
    /// Log driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_driver: Option<LogDriver>,
    /// Bumped to force a redeploy without other changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_update: Option<u64>,
}

/// Container specification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    /// Image
    pub image: String,
    /// Labels
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Command
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Args
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Mounts
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
}

/// Mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mount {
    /// Target
    pub target: String,
    /// Source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Type (bind, volume, tmpfs)
    #[serde(rename = "Type")]
    pub mount_type: String,
    /// Read only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

/// Resource requirements
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceRequirements {
    /// Limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceSpec>,
    /// Reservations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservations: Option<ResourceSpec>,
}

/// Resource specification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPU limit in nanoCPUs
    #[serde(rename = "NanoCPUs", default, skip_serializing_if = "Option::is_none")]
    pub nano_cpus: Option<i64>,
    /// Memory limit in bytes
    #[serde(rename = "MemoryBytes", default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<i64>,
}

/// Restart policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    /// Condition (none, on-failure, any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Delay between restarts, nanoseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<i64>,
    /// Max attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u64>,
    /// Window, nanoseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<i64>,
}

/// Placement configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Placement {
    /// Constraints
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    /// Max replicas per node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<u64>,
}

/// Log driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogDriver {
    /// Name
    pub name: String,
    /// Options
    #[serde(default, deserialize_with = "null_default")]
    pub options: HashMap<String, String>,
}

/// Service mode; exactly one of the fields is set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceMode {
    /// Replicated service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicated: Option<ReplicatedMode>,
    /// Global service (one task per node)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalMode>,
}

impl ServiceMode {
    pub fn replicated(replicas: u64) -> Self {
        Self {
            replicated: Some(ReplicatedMode { replicas }),
            global: None,
        }
    }

    pub fn global() -> Self {
        Self {
            replicated: None,
            global: Some(GlobalMode {}),
        }
    }
}

/// Replicated mode settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicatedMode {
    pub replicas: u64,
}

/// Global mode has no settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMode {}

/// Update configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateConfig {
    /// Parallelism
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u64>,
    /// Delay between updates, nanoseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<i64>,
    /// Failure action (pause, continue, rollback)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_action: Option<String>,
    /// Monitor, nanoseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<i64>,
    /// Max failure ratio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failure_ratio: Option<f64>,
}

/// Network attachment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkAttachmentConfig {
    /// Target network ID or name
    pub target: String,
    /// Aliases
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// Endpoint specification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointSpec {
    /// Mode (vip, dnsrr)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Ports
    #[serde(default, deserialize_with = "null_default")]
    pub ports: Vec<PortConfig>,
}

/// Port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortConfig {
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Target port
    pub target_port: u16,
    /// Published port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_port: Option<u16>,
    /// Publish mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_mode: Option<String>,
}

/// Endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Endpoint {
    /// Ports
    #[serde(default, deserialize_with = "null_default")]
    pub ports: Vec<PortConfig>,
    /// Virtual IPs
    #[serde(rename = "VirtualIPs", default, deserialize_with = "null_default")]
    pub virtual_ips: Vec<VirtualIp>,
}

/// Virtual IP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualIp {
    /// Network ID
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Address
    #[serde(rename = "Addr", default)]
    pub addr: String,
}
