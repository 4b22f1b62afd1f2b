//! Docker Engine HTTP connection

use crate::error::{ConvergeError, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error body returned by the engine
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// A connection to one Docker Engine API endpoint, e.g. `http://core-01:2375`
#[derive(Clone)]
pub struct Connection {
    /// Base URL without trailing slash
    address: String,
    /// HTTP client
    client: reqwest::Client,
}

impl Connection {
    /// Create a connection with the default request timeout
    pub fn new(address: &str) -> Result<Self> {
        Self::with_timeout(address, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a connection with a custom request timeout
    pub fn with_timeout(address: &str, timeout: Duration) -> Result<Self> {
        let address = address.trim().trim_end_matches('/');
        if !(address.starts_with("http://") || address.starts_with("https://")) {
            return Err(ConvergeError::InvalidConfig(format!(
                "engine address must start with http:// or https://, got {:?}",
                address
            )));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            address: address.to_string(),
            client,
        })
    }

    /// Connection to `host:port` over plain HTTP
    pub fn for_host(host: &str, port: u16) -> Result<Self> {
        Self::new(&format!("http://{}", join_host_port(host, port)))
    }

    /// Base URL
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Host part of the address, e.g. `core-01` for `http://core-01:2375`
    pub fn host(&self) -> &str {
        let without_scheme = self
            .address
            .split_once("//")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.address);
        let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
        if let Some(rest) = authority.strip_prefix('[') {
            // [::1]:2375
            return rest.split(']').next().unwrap_or(rest);
        }
        authority.split(':').next().unwrap_or(authority)
    }

    /// `host:port` on this engine's host, bracketing IPv6 literals
    pub fn host_port(&self, port: u16) -> String {
        join_host_port(self.host(), port)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.address, path))
    }

    /// Send a request and turn non-2xx responses into [`ConvergeError::Api`]
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(
            engine = %self.address,
            url = %response.url().path(),
            status = status.as_u16(),
            "Engine API response"
        );

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or_else(|_| body.trim().to_string());

        Err(ConvergeError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// GET a JSON document
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .send(self.request(Method::GET, path).query(query))
            .await?;
        Ok(response.json().await?)
    }

    /// POST a JSON body and decode the JSON answer
    pub async fn post<B, T>(&self, path: &str, query: &[(&str, &str)], body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(Method::POST, path).query(query).json(body))
            .await?;
        Ok(response.json().await?)
    }

    /// POST and ignore the answer body. `body` may be omitted.
    pub async fn post_empty<B>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.request(Method::POST, path).query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await?;
        Ok(())
    }

    /// DELETE a resource
    pub async fn delete(&self, path: &str, query: &[(&str, &str)]) -> Result<()> {
        self.send(self.request(Method::DELETE, path).query(query))
            .await?;
        Ok(())
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_host_extraction() {
        let conn = Connection::new("http://core-01:2375/").unwrap();
        assert_eq!(conn.address(), "http://core-01:2375");
        assert_eq!(conn.host(), "core-01");

        let conn = Connection::new("https://10.0.0.5").unwrap();
        assert_eq!(conn.host(), "10.0.0.5");

        let conn = Connection::new("http://[::1]:2375").unwrap();
        assert_eq!(conn.host(), "::1");
    }

    #[test]
    fn test_host_port_brackets_ipv6() {
        let conn = Connection::new("http://core-01:2375").unwrap();
        assert_eq!(conn.host_port(2377), "core-01:2377");

        let conn = Connection::new("http://[::1]:2375").unwrap();
        assert_eq!(conn.host_port(2377), "[::1]:2377");

        let conn = Connection::for_host("fd00::5", 2375).unwrap();
        assert_eq!(conn.address(), "http://[fd00::5]:2375");
        assert_eq!(conn.host_port(2377), "[fd00::5]:2377");
    }

    #[test]
    fn test_rejects_address_without_scheme() {
        let err = Connection::new("core-01:2375").unwrap_err();
        assert!(matches!(err, ConvergeError::InvalidConfig(_)));
    }

    #[test]
    fn test_equality_by_address() {
        let a = Connection::new("http://core-01:2375").unwrap();
        let b = Connection::for_host("core-01", 2375).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "http://core-01:2375");
    }

    #[tokio::test]
    async fn test_api_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/swarm/leave"))
            .and(query_param("force", "true"))
            .respond_with(ResponseTemplate::new(503).set_body_json(
                serde_json::json!({"message": "This node is not part of a swarm"}),
            ))
            .mount(&server)
            .await;

        let conn = Connection::new(&server.uri()).unwrap();
        let err = conn
            .post_empty::<()>("/swarm/leave", &[("force", "true")], None)
            .await
            .unwrap_err();

        assert!(err.is_status(503));
        assert_eq!(
            err.to_string(),
            "Engine API error (503): This node is not part of a swarm"
        );
    }

    #[tokio::test]
    async fn test_plain_text_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom\n"))
            .mount(&server)
            .await;

        let conn = Connection::new(&server.uri()).unwrap();
        let err = conn
            .get::<serde_json::Value>("/nodes", &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConvergeError::Api { status: 500, ref message } if message == "boom"
        ));
    }
}
