//! Swarm cluster management

use super::connection::Connection;
use super::expect;
use super::network::{self, Network};
use super::node::{Node, NodeAvailability, NodeRole};
use super::service::{Service, ServiceSpec};
use super::task::Task;
use super::{ObjectVersion, SWARM_PORT};
use crate::cleanup::CleanupReport;
use crate::error::{ConvergeError, Result};
use crate::poll::{PollResult, Poller};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Join token type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Worker,
    Manager,
}

/// Join tokens handed out by the managers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinTokens {
    pub worker: String,
    pub manager: String,
}

/// Options for `swarm init`
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Listen address, defaults to `0.0.0.0:2377`
    pub listen_addr: String,
    /// Advertise address; defaults to the connection host on the swarm port
    pub advertise_addr: Option<String>,
    /// Discard any existing cluster state
    pub force_new_cluster: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{}", SWARM_PORT),
            advertise_addr: None,
            force_new_cluster: false,
        }
    }
}

/// Options for attaching to an existing swarm
#[derive(Debug, Clone, Copy)]
pub struct DiscoverOptions {
    /// Build a connection to every node the managers know about
    pub discover_nodes: bool,
    /// Engine API port on the discovered nodes
    pub docker_api_port: u16,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            discover_nodes: false,
            docker_api_port: super::DOCKER_API_PORT,
        }
    }
}

/// `GET /swarm`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SwarmInspect {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    version: ObjectVersion,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    join_tokens: JoinTokens,
}

/// The `Swarm` section of `GET /info`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalSwarmInfo {
    /// This engine's node ID, empty when not in a swarm
    #[serde(rename = "NodeID", default)]
    pub node_id: String,
    #[serde(rename = "NodeAddr", default)]
    pub node_addr: String,
    /// `inactive`, `pending`, `active`, `error` or `locked`
    #[serde(rename = "LocalNodeState", default)]
    pub local_node_state: String,
    /// Whether this engine is a manager
    #[serde(rename = "ControlAvailable", default)]
    pub control_available: bool,
}

impl LocalSwarmInfo {
    pub fn is_active(&self) -> bool {
        self.local_node_state == "active"
    }
}

#[derive(Deserialize)]
struct EngineInfo {
    #[serde(rename = "Swarm", default)]
    swarm: LocalSwarmInfo,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct InitRequest<'a> {
    listen_addr: &'a str,
    advertise_addr: &'a str,
    force_new_cluster: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct JoinRequest<'a> {
    listen_addr: String,
    advertise_addr: String,
    remote_addrs: Vec<String>,
    join_token: &'a str,
}

#[derive(Deserialize)]
struct CreateServiceResponse {
    #[serde(rename = "ID")]
    id: String,
}

/// A swarm, reached through one of its managers
#[derive(Debug, Clone)]
pub struct Swarm {
    /// Cluster ID
    id: String,
    /// Manager connection every cluster-level call goes through
    connection: Connection,
    /// Node ID of the manager behind `connection`
    manager_node_id: String,
    /// Join tokens
    join_tokens: JoinTokens,
    /// Created timestamp
    created_at: Option<DateTime<Utc>>,
    /// Engine connections by node ID
    node_hash: HashMap<String, Connection>,
}

impl Swarm {
    /// Turn the engine behind `conn` into the first manager of a new swarm
    pub async fn init(conn: &Connection, options: InitOptions) -> Result<Self> {
        let advertise_addr = options
            .advertise_addr
            .clone()
            .unwrap_or_else(|| conn.host_port(SWARM_PORT));
        let request = InitRequest {
            listen_addr: &options.listen_addr,
            advertise_addr: &advertise_addr,
            force_new_cluster: options.force_new_cluster,
        };

        let node_id: String = conn.post("/swarm/init", &[], &request).await?;
        info!(engine = %conn, node = %node_id, advertise = %advertise_addr, "Initialized swarm");

        let mut swarm = Self::inspect(conn, node_id.clone()).await?;
        swarm.node_hash.insert(node_id, conn.clone());
        Ok(swarm)
    }

    /// Attach to the swarm `conn` manages
    pub async fn find(conn: &Connection, options: DiscoverOptions) -> Result<Self> {
        let local = Self::local_info(conn).await?;
        if !local.control_available {
            return Err(ConvergeError::Swarm(format!(
                "{} is not a swarm manager (state: {})",
                conn, local.local_node_state
            )));
        }

        let mut swarm = Self::inspect(conn, local.node_id.clone()).await?;
        swarm.node_hash.insert(local.node_id, conn.clone());

        if options.discover_nodes {
            for node in swarm.nodes().await? {
                if swarm.node_hash.contains_key(&node.id) {
                    continue;
                }
                match node.reachable_host() {
                    Some(host) => {
                        let node_conn = Connection::for_host(host, options.docker_api_port)?;
                        debug!(node = %node.id, engine = %node_conn, "Discovered node");
                        swarm.node_hash.insert(node.id.clone(), node_conn);
                    }
                    None => warn!(node = %node.id, "Node reports no address, skipping"),
                }
            }
        }

        Ok(swarm)
    }

    async fn inspect(conn: &Connection, manager_node_id: String) -> Result<Self> {
        let inspect: SwarmInspect = conn.get("/swarm", &[]).await?;
        debug!(swarm = %inspect.id, version = inspect.version.index, "Inspected swarm");
        Ok(Self {
            id: inspect.id,
            connection: conn.clone(),
            manager_node_id,
            join_tokens: inspect.join_tokens,
            created_at: inspect.created_at,
            node_hash: HashMap::new(),
        })
    }

    /// The engine's own view of its swarm membership
    pub async fn local_info(conn: &Connection) -> Result<LocalSwarmInfo> {
        let info: EngineInfo = conn.get("/info", &[]).await?;
        Ok(info.swarm)
    }

    /// Make the engine behind `conn` leave whatever swarm it is in
    pub async fn leave(conn: &Connection, force: bool) -> Result<()> {
        let force = force.to_string();
        conn.post_empty::<()>("/swarm/leave", &[("force", &force)], None)
            .await?;
        info!(engine = %conn, "Left swarm");
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn manager_node_id(&self) -> &str {
        &self.manager_node_id
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Get join token
    pub fn join_token(&self, token_type: TokenType) -> &str {
        match token_type {
            TokenType::Worker => &self.join_tokens.worker,
            TokenType::Manager => &self.join_tokens.manager,
        }
    }

    /// Engine connections of the nodes this swarm knows how to reach
    pub fn node_hash(&self) -> &HashMap<String, Connection> {
        &self.node_hash
    }

    /// Connection to one node's engine
    pub fn node_connection(&self, node_id: &str) -> Result<&Connection> {
        self.node_hash
            .get(node_id)
            .ok_or_else(|| ConvergeError::NodeNotFound(node_id.to_string()))
    }

    /// Join the engine behind `conn` as a worker
    pub async fn join_worker(&mut self, conn: &Connection) -> Result<Node> {
        self.join(conn, TokenType::Worker).await
    }

    /// Join the engine behind `conn` as a manager
    pub async fn join_manager(&mut self, conn: &Connection) -> Result<Node> {
        self.join(conn, TokenType::Manager).await
    }

    /// Join the engine behind `conn` and return its node as the managers see it
    pub async fn join(&mut self, conn: &Connection, token_type: TokenType) -> Result<Node> {
        let request = JoinRequest {
            listen_addr: format!("0.0.0.0:{}", SWARM_PORT),
            advertise_addr: conn.host_port(SWARM_PORT),
            remote_addrs: vec![self.connection.host_port(SWARM_PORT)],
            join_token: self.join_token(token_type),
        };
        conn.post_empty("/swarm/join", &[], Some(&request)).await?;

        let local = Self::local_info(conn).await?;
        if local.node_id.is_empty() {
            return Err(ConvergeError::Swarm(format!(
                "{} joined but reports no node ID",
                conn
            )));
        }

        let node = self.node(&local.node_id).await?;
        info!(
            swarm = %self.id,
            node = %node.id,
            engine = %conn,
            role = ?token_type,
            "Node joined swarm"
        );
        self.node_hash.insert(node.id.clone(), conn.clone());
        Ok(node)
    }

    /// List all nodes
    pub async fn nodes(&self) -> Result<Vec<Node>> {
        self.connection.get("/nodes", &[]).await
    }

    /// List manager nodes
    pub async fn manager_nodes(&self) -> Result<Vec<Node>> {
        self.nodes_with_role(NodeRole::Manager).await
    }

    /// List worker nodes
    pub async fn worker_nodes(&self) -> Result<Vec<Node>> {
        self.nodes_with_role(NodeRole::Worker).await
    }

    async fn nodes_with_role(&self, role: NodeRole) -> Result<Vec<Node>> {
        let mut nodes = self.nodes().await?;
        nodes.retain(|n| n.role() == role);
        Ok(nodes)
    }

    /// Get a node
    pub async fn node(&self, node_id: &str) -> Result<Node> {
        self.connection
            .get(&format!("/nodes/{}", node_id), &[])
            .await
            .map_err(|e| not_found(e, ConvergeError::NodeNotFound(node_id.to_string())))
    }

    /// Set a node's availability to `drain` so its tasks move elsewhere
    pub async fn drain_node(&self, node_id: &str) -> Result<Node> {
        self.set_availability(node_id, NodeAvailability::Drain).await
    }

    /// Update a node's availability
    pub async fn set_availability(
        &self,
        node_id: &str,
        availability: NodeAvailability,
    ) -> Result<Node> {
        let node = self.node(node_id).await?;
        let mut spec = node.spec.clone();
        spec.availability = availability;

        let version = node.version.index.to_string();
        self.connection
            .post_empty(
                &format!("/nodes/{}/update", node_id),
                &[("version", &version)],
                Some(&spec),
            )
            .await?;
        info!(node = %node_id, ?availability, "Updated node availability");

        self.node(node_id).await
    }

    /// Make a node leave the swarm through its own engine
    pub async fn leave_node(&self, node_id: &str, force: bool) -> Result<()> {
        let conn = self.node_connection(node_id)?;
        Self::leave(conn, force).await
    }

    /// Remove a node from the managers' node list
    pub async fn remove_node(&mut self, node_id: &str, force: bool) -> Result<()> {
        let force = force.to_string();
        self.connection
            .delete(&format!("/nodes/{}", node_id), &[("force", &force)])
            .await
            .map_err(|e| not_found(e, ConvergeError::NodeNotFound(node_id.to_string())))?;
        self.node_hash.remove(node_id);
        info!(swarm = %self.id, node = %node_id, "Removed node");
        Ok(())
    }

    /// List all services
    pub async fn services(&self) -> Result<Vec<Service>> {
        self.connection.get("/services", &[]).await
    }

    /// Get a service
    pub async fn service(&self, service_id: &str) -> Result<Service> {
        self.connection
            .get(&format!("/services/{}", service_id), &[])
            .await
            .map_err(|e| not_found(e, ConvergeError::ServiceNotFound(service_id.to_string())))
    }

    /// Create a service
    pub async fn create_service(&self, spec: &ServiceSpec) -> Result<Service> {
        let created: CreateServiceResponse =
            self.connection.post("/services/create", &[], spec).await?;
        info!(
            swarm = %self.id,
            service = %spec.name,
            id = %created.id,
            replicas = ?spec.replicas(),
            "Created service"
        );
        self.service(&created.id).await
    }

    /// Change the replica count of a service
    pub async fn scale_service(&self, service_id: &str, replicas: u64) -> Result<Service> {
        let service = self.service(service_id).await?;
        let mut spec = service.spec.clone();
        spec.set_replicas(replicas);

        let version = service.version.index.to_string();
        self.connection
            .post_empty(
                &format!("/services/{}/update", service_id),
                &[("version", &version)],
                Some(&spec),
            )
            .await?;
        info!(service = %service.name(), replicas, "Scaled service");

        self.service(service_id).await
    }

    /// Remove a service
    pub async fn remove_service(&self, service_id: &str) -> Result<()> {
        self.connection
            .delete(&format!("/services/{}", service_id), &[])
            .await
            .map_err(|e| not_found(e, ConvergeError::ServiceNotFound(service_id.to_string())))?;
        info!(service = %service_id, "Removed service");
        Ok(())
    }

    /// List all tasks
    pub async fn tasks(&self) -> Result<Vec<Task>> {
        self.connection.get("/tasks", &[]).await
    }

    /// List the tasks of one service
    pub async fn service_tasks(&self, service_id: &str) -> Result<Vec<Task>> {
        let filters = serde_json::json!({ "service": [service_id] }).to_string();
        self.connection.get("/tasks", &[("filters", &filters)]).await
    }

    /// Create an overlay network through the manager
    pub async fn create_network_overlay(&self, name: &str) -> Result<Network> {
        network::create_overlay(&self.connection, name).await
    }

    /// Find a network by exact name on the manager
    pub async fn find_network_by_name(&self, name: &str) -> Result<Option<Network>> {
        network::find_by_name(&self.connection, name).await
    }

    /// Remove a network through the manager
    pub async fn remove_network(&self, network_id: &str) -> Result<()> {
        network::remove(&self.connection, network_id).await
    }

    /// Remove a network by name through the manager. Returns whether one existed.
    pub async fn remove_network_with_name(&self, name: &str) -> Result<bool> {
        network::remove_by_name(&self.connection, name).await
    }

    /// Poll the task list until `predicate` holds
    pub async fn wait_for_tasks<P>(
        &self,
        poller: &Poller,
        predicate: P,
    ) -> Result<PollResult<Vec<Task>, ConvergeError>>
    where
        P: Fn(&Vec<Task>) -> bool,
    {
        Ok(poller.run(|| self.tasks(), predicate).await?)
    }

    /// Poll the node list until `predicate` holds
    pub async fn wait_for_nodes<P>(
        &self,
        poller: &Poller,
        predicate: P,
    ) -> Result<PollResult<Vec<Node>, ConvergeError>>
    where
        P: Fn(&Vec<Node>) -> bool,
    {
        Ok(poller.run(|| self.nodes(), predicate).await?)
    }

    /// Poll the service list until `predicate` holds
    pub async fn wait_for_services<P>(
        &self,
        poller: &Poller,
        predicate: P,
    ) -> Result<PollResult<Vec<Service>, ConvergeError>>
    where
        P: Fn(&Vec<Service>) -> bool,
    {
        Ok(poller.run(|| self.services(), predicate).await?)
    }

    /// Tear the swarm down: remove every service, then make every known
    /// node leave, workers before the manager. Failures are recorded in the
    /// returned report and never stop the remaining steps.
    pub async fn remove(self) -> CleanupReport {
        let mut report = CleanupReport::new();

        if let Some(services) = report.run("list services", self.services()).await {
            for service in services {
                report
                    .run(
                        format!("remove service {}", service.name()),
                        self.remove_service(&service.id),
                    )
                    .await;
            }
        }

        let mut nodes: Vec<(&String, &Connection)> = self
            .node_hash
            .iter()
            .filter(|(id, _)| **id != self.manager_node_id)
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(b.0));
        for (node_id, conn) in nodes {
            report
                .run(format!("leave node {}", node_id), Self::leave(conn, true))
                .await;
        }

        report
            .run(
                format!("leave manager {}", self.manager_node_id),
                Self::leave(&self.connection, true),
            )
            .await;

        if report.is_clean() {
            info!(swarm = %self.id, "Removed swarm");
        } else {
            warn!(
                swarm = %self.id,
                failures = report.failures().len(),
                "Removed swarm with cleanup failures"
            );
        }
        report
    }

    /// Running tasks right now
    pub async fn running_task_count(&self) -> Result<usize> {
        Ok(expect::running_count(&self.tasks().await?))
    }
}

fn not_found(err: ConvergeError, missing: ConvergeError) -> ConvergeError {
    if err.is_status(404) {
        missing
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn swarm_json() -> serde_json::Value {
        serde_json::json!({
            "ID": "abajmipo7b4xz5ip2nrla6b11",
            "Version": {"Index": 373531},
            "CreatedAt": "2016-08-18T10:44:24.496525531Z",
            "UpdatedAt": "2017-08-09T07:09:37.632105588Z",
            "Spec": {"Name": "default"},
            "JoinTokens": {
                "Worker": "SWMTKN-1-worker",
                "Manager": "SWMTKN-1-manager"
            }
        })
    }

    #[tokio::test]
    async fn test_init_advertises_connection_host() {
        let server = MockServer::start().await;
        let conn = Connection::new(&server.uri()).unwrap();
        let advertise = conn.host_port(SWARM_PORT);

        Mock::given(method("POST"))
            .and(path("/swarm/init"))
            .and(body_partial_json(serde_json::json!({
                "ListenAddr": "0.0.0.0:2377",
                "AdvertiseAddr": advertise,
                "ForceNewCluster": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json("mgr-node"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/swarm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(swarm_json()))
            .mount(&server)
            .await;

        let swarm = Swarm::init(&conn, InitOptions::default()).await.unwrap();
        assert_eq!(swarm.id(), "abajmipo7b4xz5ip2nrla6b11");
        assert_eq!(swarm.manager_node_id(), "mgr-node");
        assert_eq!(swarm.join_token(TokenType::Worker), "SWMTKN-1-worker");
        assert_eq!(swarm.join_token(TokenType::Manager), "SWMTKN-1-manager");
        assert_eq!(swarm.connection(), &conn);
        assert_eq!(swarm.node_hash().len(), 1);
        assert_eq!(swarm.node_connection("mgr-node").unwrap(), &conn);
    }

    #[tokio::test]
    async fn test_find_rejects_worker_engine() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Swarm": {"NodeID": "w1", "LocalNodeState": "active", "ControlAvailable": false}
            })))
            .mount(&server)
            .await;

        let conn = Connection::new(&server.uri()).unwrap();
        let err = Swarm::find(&conn, DiscoverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergeError::Swarm(_)));
    }

    #[tokio::test]
    async fn test_missing_service_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Swarm": {"NodeID": "m1", "LocalNodeState": "active", "ControlAvailable": true}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/swarm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(swarm_json()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/nope"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"message": "service nope not found"})),
            )
            .mount(&server)
            .await;

        let conn = Connection::new(&server.uri()).unwrap();
        let swarm = Swarm::find(&conn, DiscoverOptions::default()).await.unwrap();
        assert_eq!(swarm.node_hash().len(), 1);

        let err = swarm.service("nope").await.unwrap_err();
        assert!(matches!(err, ConvergeError::ServiceNotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_leave_sends_force_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/swarm/leave"))
            .and(query_param("force", "false"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let conn = Connection::new(&server.uri()).unwrap();
        Swarm::leave(&conn, false).await.unwrap();
    }
}
