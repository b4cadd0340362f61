//! Node RPC collaborator.
//!
//! Fee estimation and broadcast go to the chain's full node. [`NodeRpc`] is
//! the boundary; [`JsonRpcClient`] speaks the bitcoind JSON-RPC dialect over
//! HTTP.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::chain::ChainNetwork;
use crate::service::{FetchError, ServiceError};

/// A node that answers JSON-RPC method calls.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Calls `method` with positional `params` and returns its `result`.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, FetchError>;
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// bitcoind-compatible JSON-RPC client.
#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: Url,
    user: Option<String>,
    password: Option<String>,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Builds a client for `url`, authenticating with basic auth when a user
    /// is given.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] if the HTTP client cannot be constructed.
    pub fn new(
        url: Url,
        user: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::with("failed to build RPC client", e))?;
        Ok(Self {
            http,
            url,
            user,
            password,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl NodeRpc for JsonRpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, FetchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut request = self.http.post(self.url.clone()).json(&body);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }
        tracing::debug!(method, id, "rpc call");

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::with(&format!("{method} request failed"), e))?;
        let status = response.status();
        // bitcoind answers RPC errors with a 500 and a JSON body, so parse first.
        let reply: RpcReply = response
            .json()
            .await
            .map_err(|e| FetchError::with(&format!("{method} returned HTTP {status}"), e))?;
        if let Some(fault) = reply.error {
            return Err(FetchError::new(format!("{} (code {})", fault.message, fault.code)));
        }
        Ok(reply.result)
    }
}

/// Node clients of one chain, keyed by network.
#[derive(Clone, Default)]
pub struct NodePool {
    chain: String,
    nodes: HashMap<String, Arc<dyn NodeRpc>>,
}

impl NodePool {
    #[must_use]
    pub fn new(chain: &str) -> Self {
        Self {
            chain: chain.to_uppercase(),
            nodes: HashMap::new(),
        }
    }

    /// Adds the node serving `network`.
    #[must_use]
    pub fn with_node(mut self, network: &str, node: Arc<dyn NodeRpc>) -> Self {
        self.nodes.insert(network.to_lowercase(), node);
        self
    }

    /// The node serving `chain`'s network.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownNetwork`] if no node is configured for it.
    pub fn node(&self, chain: &ChainNetwork) -> Result<&dyn NodeRpc, ServiceError> {
        self.nodes
            .get(&chain.network)
            .map(Arc::as_ref)
            .ok_or_else(|| ServiceError::UnknownNetwork {
                chain: chain.chain.clone(),
                network: chain.network.clone(),
            })
    }
}

impl std::fmt::Debug for NodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field("chain", &self.chain)
            .field("networks", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}
