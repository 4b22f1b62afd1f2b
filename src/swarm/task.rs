//! Swarm task model

use super::ObjectVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Task is new
    #[default]
    New,
    /// Task is allocated
    Allocated,
    /// Task is pending
    Pending,
    /// Task is assigned
    Assigned,
    /// Task is accepted
    Accepted,
    /// Task is preparing
    Preparing,
    /// Task is ready
    Ready,
    /// Task is starting
    Starting,
    /// Task is running
    Running,
    /// Task completed
    Complete,
    /// Task shutdown
    Shutdown,
    /// Task failed
    Failed,
    /// Task rejected
    Rejected,
    /// Task removed
    Remove,
    /// Task is orphaned
    Orphaned,
}

/// Swarm task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    /// Task ID
    #[serde(rename = "ID")]
    pub id: String,
    /// Object version
    #[serde(default)]
    pub version: ObjectVersion,
    /// Service ID
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    /// Slot (for replicated services)
    #[serde(default)]
    pub slot: Option<u64>,
    /// Node ID, unset until the scheduler places the task
    #[serde(rename = "NodeID", default)]
    pub node_id: Option<String>,
    /// Task status
    #[serde(default)]
    pub status: TaskStatus,
    /// Desired state
    #[serde(default)]
    pub desired_state: TaskState,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn state(&self) -> TaskState {
        self.status.state
    }

    /// Check if task is running
    pub fn is_running(&self) -> bool {
        self.status.state == TaskState::Running
    }

    /// Check if task has been shut down
    pub fn is_shutdown(&self) -> bool {
        self.status.state == TaskState::Shutdown
    }

    /// Check if task is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.state,
            TaskState::Complete
                | TaskState::Shutdown
                | TaskState::Failed
                | TaskState::Rejected
                | TaskState::Remove
                | TaskState::Orphaned
        )
    }

    /// Check if task is placed on the given node
    pub fn is_on_node(&self, node_id: &str) -> bool {
        self.node_id.as_deref() == Some(node_id)
    }

    /// Image of the task's container, if reported
    pub fn image(&self) -> Option<&str> {
        self.status
            .container_status
            .as_ref()
            .and_then(|c| c.image.as_deref())
    }
}

/// Task status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskStatus {
    /// Timestamp
    pub timestamp: Option<DateTime<Utc>>,
    /// State
    #[serde(default)]
    pub state: TaskState,
    /// Message
    #[serde(default)]
    pub message: String,
    /// Error
    #[serde(default)]
    pub err: Option<String>,
    /// Container status
    #[serde(default)]
    pub container_status: Option<ContainerStatus>,
}

/// Container status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Container ID
    #[serde(rename = "ContainerID", default)]
    pub container_id: String,
    /// PID
    #[serde(rename = "PID", default)]
    pub pid: Option<i64>,
    /// Exit code
    #[serde(rename = "ExitCode", default)]
    pub exit_code: Option<i64>,
    /// Image, when the engine reports it
    #[serde(rename = "Image", default)]
    pub image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_running_task() {
        let task: Task = serde_json::from_str(
            r#"{
                "ID": "0kzzo1i0y4jz6027t0k7aezc7",
                "Version": {"Index": 71},
                "CreatedAt": "2016-06-07T21:07:31.171892745Z",
                "UpdatedAt": "2016-06-07T21:07:31.376370513Z",
                "ServiceID": "9mnpnzenvg8p8tdbtq4wvbkcz",
                "Slot": 1,
                "NodeID": "60gvrl6tm78dmak4yl7srz94v",
                "Status": {
                    "Timestamp": "2016-06-07T21:07:31.290032978Z",
                    "State": "running",
                    "Message": "started",
                    "ContainerStatus": {"ContainerID": "e5d62702a1b4", "PID": 677}
                },
                "DesiredState": "running"
            }"#,
        )
        .unwrap();

        assert!(task.is_running());
        assert!(!task.is_terminal());
        assert!(task.is_on_node("60gvrl6tm78dmak4yl7srz94v"));
        assert_eq!(task.slot, Some(1));
        assert_eq!(task.desired_state, TaskState::Running);
        assert_eq!(
            task.status.container_status.as_ref().unwrap().pid,
            Some(677)
        );
        assert!(task.image().is_none());
    }

    #[test]
    fn test_unplaced_task() {
        let task: Task = serde_json::from_str(
            r#"{
                "ID": "t1",
                "ServiceID": "s1",
                "Status": {"State": "pending", "Message": "no suitable node"},
                "DesiredState": "running"
            }"#,
        )
        .unwrap();

        assert_eq!(task.state(), TaskState::Pending);
        assert!(task.node_id.is_none());
        assert!(!task.is_on_node("n1"));
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let task: Task = serde_json::from_str(
            r#"{"ID": "t2", "ServiceID": "s1", "Status": {"State": "shutdown"}, "DesiredState": "shutdown"}"#,
        )
        .unwrap();

        assert!(task.is_shutdown());
        assert!(task.is_terminal());
    }
}
