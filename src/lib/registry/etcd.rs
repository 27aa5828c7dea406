//! Client for the etcd v2 keys API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::store::{KeyValueStore, StoreError, StoreResult};

const KEY_NOT_FOUND: u64 = 100;
const NODE_EXISTS: u64 = 105;

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    node: EtcdNode,
}

#[derive(Debug, Deserialize)]
struct EtcdNode {
    key: Option<String>,
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdErrorBody {
    error_code: u64,
    message: String,
    cause: Option<String>,
}

pub struct EtcdStore {
    client: Client,
    endpoints: Vec<String>,
}

impl EtcdStore {
    pub fn new(endpoints: Vec<String>) -> StoreResult<Self> {
        if endpoints.is_empty() {
            return Err(StoreError::Transport("no etcd endpoints configured".to_string()));
        }
        let client = Client::builder()
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(EtcdStore {
            client,
            endpoints: endpoints
                .into_iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
        })
    }

    /// Sends the request to the first endpoint that accepts a connection.
    async fn send<F>(&self, method: Method, key: &str, build: F) -> StoreResult<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            let url = format!("{}/v2/keys{}", endpoint, key);
            match build(self.client.request(method.clone(), &url)).send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "etcd endpoint unreachable");
                    last_error = Some(e);
                }
                Err(e) => return Err(StoreError::Transport(e.to_string())),
            }
        }

        Err(StoreError::Transport(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no etcd endpoints".to_string()),
        ))
    }

    async fn node(&self, response: Response, key: &str) -> StoreResult<EtcdNode> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if status.is_success() {
            let parsed: EtcdResponse = serde_json::from_str(&body)?;
            return Ok(parsed.node);
        }

        Err(error_from(status, &body, key))
    }
}

fn error_from(status: StatusCode, body: &str, key: &str) -> StoreError {
    match serde_json::from_str::<EtcdErrorBody>(body) {
        Ok(err) if err.error_code == KEY_NOT_FOUND => {
            StoreError::NotFound(err.cause.unwrap_or_else(|| key.to_string()))
        }
        Ok(err) if err.error_code == NODE_EXISTS => {
            StoreError::AlreadyExists(err.cause.unwrap_or_else(|| key.to_string()))
        }
        Ok(err) => StoreError::Server {
            status: status.as_u16(),
            message: err.message,
        },
        Err(_) => StoreError::Server {
            status: status.as_u16(),
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl KeyValueStore for EtcdStore {
    async fn create_dir(&self, key: &str) -> StoreResult<()> {
        let response = self
            .send(Method::PUT, key, |req| {
                req.query(&[("dir", "true"), ("prevExist", "false")])
            })
            .await?;
        self.node(response, key).await.map(|_| ())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let ttl = ttl.map(|ttl| ttl.as_secs().max(1).to_string());
        let response = self
            .send(Method::PUT, key, |req| match &ttl {
                Some(ttl) => req.form(&[("value", value), ("ttl", ttl.as_str())]),
                None => req.form(&[("value", value)]),
            })
            .await?;
        self.node(response, key).await.map(|_| ())
    }

    async fn update(&self, key: &str, value: &str) -> StoreResult<()> {
        let response = self
            .send(Method::PUT, key, |req| {
                req.query(&[("prevExist", "true")]).form(&[("value", value)])
            })
            .await?;
        self.node(response, key).await.map(|_| ())
    }

    async fn get(&self, key: &str) -> StoreResult<String> {
        let response = self.send(Method::GET, key, |req| req).await?;
        let node = self.node(response, key).await?;
        node.value.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self, dir: &str) -> StoreResult<Vec<String>> {
        let response = self
            .send(Method::GET, dir, |req| {
                req.query(&[("recursive", "true"), ("sorted", "true")])
            })
            .await?;
        let node = self.node(response, dir).await?;

        Ok(node
            .nodes
            .into_iter()
            .filter(|child| !child.dir)
            .filter_map(|child| {
                if child.value.is_none() {
                    tracing::debug!(key = ?child.key, "Skipping etcd node without value");
                }
                child.value
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let response = self
            .send(Method::DELETE, key, |req| req.query(&[("recursive", "true")]))
            .await?;
        self.node(response, key).await.map(|_| ())
    }
}
