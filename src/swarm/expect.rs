//! Snapshot predicates for waiting on swarm state
//!
//! Each constructor returns a closure suitable as the predicate of a
//! [`Poller`](crate::poll::Poller) run over a list snapshot.

use super::node::{Node, NodeState};
use super::service::Service;
use super::task::Task;

/// Number of tasks in the `running` state
pub fn running_count(tasks: &[Task]) -> usize {
    tasks.iter().filter(|t| t.is_running()).count()
}

/// Exactly `n` tasks are running
pub fn tasks_running(n: usize) -> impl Fn(&Vec<Task>) -> bool {
    move |tasks| running_count(tasks) == n
}

/// Exactly `n` tasks are running and none of them on `node_id`
pub fn running_off_node(node_id: impl Into<String>, n: usize) -> impl Fn(&Vec<Task>) -> bool {
    let node_id = node_id.into();
    move |tasks| {
        let running: Vec<&Task> = tasks.iter().filter(|t| t.is_running()).collect();
        running.len() == n && running.iter().all(|t| !t.is_on_node(&node_id))
    }
}

/// Exactly `n` tasks have not been shut down
pub fn active_tasks(n: usize) -> impl Fn(&Vec<Task>) -> bool {
    move |tasks| tasks.iter().filter(|t| !t.is_shutdown()).count() == n
}

/// No tasks left at all
pub fn no_tasks() -> impl Fn(&Vec<Task>) -> bool {
    |tasks| tasks.is_empty()
}

/// Exactly `n` worker nodes, all reported down
pub fn workers_down(n: usize) -> impl Fn(&Vec<Node>) -> bool {
    move |nodes| {
        let workers: Vec<&Node> = nodes.iter().filter(|n| !n.is_manager()).collect();
        workers.len() == n && workers.iter().all(|w| w.state() == NodeState::Down)
    }
}

/// Exactly `n` nodes
pub fn node_count(n: usize) -> impl Fn(&Vec<Node>) -> bool {
    move |nodes| nodes.len() == n
}

/// Some service reports `network_id` on its endpoint
pub fn service_has_network(network_id: impl Into<String>) -> impl Fn(&Vec<Service>) -> bool {
    let network_id = network_id.into();
    move |services| {
        services
            .iter()
            .any(|s| s.network_ids().contains(&network_id.as_str()))
    }
}
