//! Blocking JSON-RPC 1.0 transport.

use {
    crate::{
        client::NodeRpc,
        error::{ProviderError, Result, RpcError},
    },
    log::trace,
    serde::Deserialize,
    serde_json::{json, Value},
    std::{
        sync::atomic::{AtomicU64, Ordering},
        time::Duration,
    },
};

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ProviderError>,
}

/// RPC handle for one node's HTTP endpoint.
pub struct HttpRpcClient {
    url: String,
    user: String,
    password: String,
    client: reqwest::blocking::Client,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let url = url.into();
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RpcError::transport("<connect>", err))?;
        Ok(Self {
            url,
            user: user.into(),
            password: password.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl NodeRpc for HttpRpcClient {
    fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!("{} -> {method} {body}", self.url);

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .map_err(|err| RpcError::transport(method, err))?;
        // zcashd answers provider errors with HTTP 500 and a JSON body, so
        // the status alone says nothing about the outcome.
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| RpcError::transport(method, err))?;
        if text.trim().is_empty() {
            return Err(RpcError::transport(
                method,
                format!("empty reply with HTTP status {status}"),
            ));
        }

        let envelope: Envelope =
            serde_json::from_str(&text).map_err(|err| RpcError::schema(method, err))?;
        match envelope.error {
            Some(err) => Err(err.into()),
            None => Ok(envelope.result.unwrap_or(Value::Null)),
        }
    }
}
