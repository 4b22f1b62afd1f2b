//! Overlay networks

use super::connection::Connection;
use super::null_default;
use crate::error::{ConvergeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Network driver used for swarm-scoped networks
pub const OVERLAY_DRIVER: &str = "overlay";

/// Docker network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Network {
    /// Network ID
    #[serde(rename = "Id")]
    pub id: String,
    /// Network name
    pub name: String,
    /// Driver name
    #[serde(default)]
    pub driver: String,
    /// `local` or `swarm`
    #[serde(default)]
    pub scope: String,
    /// Attachable by standalone containers
    #[serde(default)]
    pub attachable: bool,
    /// IPAM configuration
    #[serde(rename = "IPAM", default)]
    pub ipam: Ipam,
    /// Labels
    #[serde(default, deserialize_with = "null_default")]
    pub labels: HashMap<String, String>,
}

impl Network {
    /// Subnets assigned by IPAM
    pub fn subnets(&self) -> Vec<&str> {
        self.ipam
            .config
            .iter()
            .filter_map(|c| c.subnet.as_deref())
            .collect()
    }

    pub fn is_overlay(&self) -> bool {
        self.driver == OVERLAY_DRIVER
    }
}

/// IP address management settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ipam {
    #[serde(default)]
    pub driver: String,
    #[serde(default, deserialize_with = "null_default")]
    pub config: Vec<IpamConfig>,
}

/// One IPAM pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpamConfig {
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateNetworkRequest<'a> {
    name: &'a str,
    driver: &'a str,
    check_duplicate: bool,
    attachable: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateNetworkResponse {
    #[serde(rename = "Id")]
    id: String,
}

/// Create an overlay network. Only a manager can do this.
pub async fn create_overlay(conn: &Connection, name: &str) -> Result<Network> {
    let request = CreateNetworkRequest {
        name,
        driver: OVERLAY_DRIVER,
        check_duplicate: true,
        attachable: false,
    };
    let created: CreateNetworkResponse = conn.post("/networks/create", &[], &request).await?;
    info!(network = %name, id = %created.id, "Created overlay network");
    get(conn, &created.id).await
}

/// Inspect a network
pub async fn get(conn: &Connection, id: &str) -> Result<Network> {
    conn.get(&format!("/networks/{}", id), &[])
        .await
        .map_err(|e| not_found(e, id))
}

/// List all networks known to the engine
pub async fn list(conn: &Connection) -> Result<Vec<Network>> {
    conn.get("/networks", &[]).await
}

/// Find a network by exact name.
///
/// The engine's name filter matches substrings, so the result is narrowed
/// again client-side.
pub async fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Network>> {
    let filters = serde_json::json!({ "name": [name] }).to_string();
    let networks: Vec<Network> = conn.get("/networks", &[("filters", &filters)]).await?;
    Ok(networks.into_iter().find(|n| n.name == name))
}

/// Remove a network
pub async fn remove(conn: &Connection, id: &str) -> Result<()> {
    conn.delete(&format!("/networks/{}", id), &[])
        .await
        .map_err(|e| not_found(e, id))?;
    debug!(network = %id, engine = %conn, "Removed network");
    Ok(())
}

/// Remove a network by name. Returns whether one existed.
pub async fn remove_by_name(conn: &Connection, name: &str) -> Result<bool> {
    match find_by_name(conn, name).await? {
        Some(network) => {
            remove(conn, &network.id).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn not_found(err: ConvergeError, id: &str) -> ConvergeError {
    if err.is_status(404) {
        ConvergeError::NetworkNotFound(id.to_string())
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn overlay_json(id: &str, name: &str) -> serde_json::Value {
        serde_json::json!({
            "Name": name,
            "Id": id,
            "Scope": "swarm",
            "Driver": "overlay",
            "IPAM": {"Driver": "default", "Config": [{"Subnet": "10.0.0.0/24", "Gateway": "10.0.0.1"}]},
            "Labels": null
        })
    }

    #[test]
    fn test_parse_network_without_ipam_config() {
        let network: Network = serde_json::from_str(
            r#"{"Name": "bridge", "Id": "f2de39df", "Scope": "local", "Driver": "bridge", "IPAM": {"Driver": "default", "Config": null}}"#,
        )
        .unwrap();
        assert!(network.subnets().is_empty());
        assert!(!network.is_overlay());
    }

    #[tokio::test]
    async fn test_create_overlay_then_inspect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/networks/create"))
            .and(body_partial_json(serde_json::json!({
                "Name": "overlay1",
                "Driver": "overlay",
                "CheckDuplicate": true
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"Id": "n1", "Warning": ""})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/networks/n1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(overlay_json("n1", "overlay1")))
            .mount(&server)
            .await;

        let conn = Connection::new(&server.uri()).unwrap();
        let network = create_overlay(&conn, "overlay1").await.unwrap();
        assert_eq!(network.id, "n1");
        assert!(network.is_overlay());
        assert_eq!(network.subnets(), ["10.0.0.0/24"]);
    }

    #[tokio::test]
    async fn test_find_by_name_is_exact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/networks"))
            .and(query_param("filters", r#"{"name":["overlay1"]}"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                overlay_json("n2", "overlay12"),
                overlay_json("n1", "overlay1"),
            ])))
            .mount(&server)
            .await;

        let conn = Connection::new(&server.uri()).unwrap();
        let found = find_by_name(&conn, "overlay1").await.unwrap().unwrap();
        assert_eq!(found.id, "n1");
    }

    #[tokio::test]
    async fn test_remove_missing_network() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/networks/gone"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"message": "network gone not found"})),
            )
            .mount(&server)
            .await;

        let conn = Connection::new(&server.uri()).unwrap();
        let err = remove(&conn, "gone").await.unwrap_err();
        assert!(matches!(err, ConvergeError::NetworkNotFound(id) if id == "gone"));
    }
}
