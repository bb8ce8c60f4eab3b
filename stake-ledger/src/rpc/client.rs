// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! JSON-RPC client for a bitcoind-style daemon (Verus, PIVX and relatives).
//!
//! Each attempt holds a semaphore permit, failed attempts are retried with exponential backoff,
//! and paced by a client-wide [`AdaptiveBackoff`] while the daemon keeps failing.

use super::retry::{AdaptiveBackoff, RetryPolicy};
use super::ChainSource;
use crate::error::{LedgerError, LedgerResult};
use crate::types::{AddressUtxo, BlockSummary, IdentityHistory, RawBlock, RawTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

// bitcoind RPC error codes
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
const RPC_IN_WARMUP: i64 = -28;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcClientConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound of concurrent requests against the daemon
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Ceiling of the client-wide pacing delay
    #[serde(default = "default_pacing_ceiling_ms")]
    pub pacing_ceiling_ms: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_in_flight() -> usize {
    16
}

fn default_pacing_ceiling_ms() -> u64 {
    5_000
}

impl RpcClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            password: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_in_flight: default_max_in_flight(),
            retry: RetryPolicy::default(),
            pacing_ceiling_ms: default_pacing_ceiling_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Clone, Debug)]
pub struct DaemonRpcClient {
    http_client: reqwest::Client,
    url: String,
    auth: Option<(String, Option<String>)>,
    request_id: Arc<AtomicU64>,
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
    backoff: Arc<AdaptiveBackoff>,
}

impl DaemonRpcClient {
    pub fn new(config: RpcClientConfig) -> LedgerResult<Self> {
        if config.max_in_flight == 0 {
            return Err(LedgerError::Config(
                "rpc max_in_flight must be at least 1".to_string(),
            ));
        }
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_in_flight)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LedgerError::Config(format!("failed to build http client: {e}")))?;

        let auth = config.user.clone().map(|user| (user, config.password.clone()));
        Ok(Self {
            http_client,
            url: config.url,
            auth,
            request_id: Arc::new(AtomicU64::new(1)),
            semaphore: Arc::new(Semaphore::new(config.max_in_flight)),
            retry: config.retry,
            backoff: Arc::new(AdaptiveBackoff::new(
                Duration::from_millis(100),
                Duration::from_millis(config.pacing_ceiling_ms),
            )),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current client-wide pacing delay
    pub fn pacing_delay(&self) -> Duration {
        self.backoff.current()
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> LedgerResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "1.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params: &params,
        };
        let request = &request;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        backoff::future::retry_notify(
            self.retry.exponential_backoff(),
            || {
                attempt += 1;
                let current = attempt;
                async move {
                    self.backoff.pace().await;
                    match self.send_permitted(request).await {
                        Ok(value) => {
                            self.backoff.on_success();
                            Ok(value)
                        }
                        Err(err) if err.is_retryable() => {
                            self.backoff.on_failure();
                            if current >= max_attempts {
                                warn!(
                                    "[RPC] {} failed after {} attempts: {}",
                                    method, max_attempts, err
                                );
                                Err(backoff::Error::permanent(err))
                            } else {
                                Err(backoff::Error::transient(err))
                            }
                        }
                        Err(err) => {
                            // The daemon answered, so it is reachable.
                            self.backoff.on_success();
                            Err(backoff::Error::permanent(err))
                        }
                    }
                }
            },
            |err: LedgerError, delay: Duration| {
                warn!(
                    "[RPC] transient error calling {}, retrying in {:?}: {}",
                    method, delay, err
                );
            },
        )
        .await
    }

    /// One attempt under an in-flight permit. Retry sleeps happen without the permit.
    async fn send_permitted(&self, request: &JsonRpcRequest<'_>) -> LedgerResult<Value> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LedgerError::Cancelled)?;
        self.send_once(request).await
    }

    async fn send_once(&self, request: &JsonRpcRequest<'_>) -> LedgerResult<Value> {
        let mut builder = self.http_client.post(&self.url).json(request);
        if let Some((user, password)) = &self.auth {
            builder = builder.basic_auth(user, password.as_ref());
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::BAD_GATEWAY
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            || status == reqwest::StatusCode::GATEWAY_TIMEOUT
        {
            return Err(LedgerError::TransientRpc(format!(
                "{} returned HTTP {}",
                request.method, status
            )));
        }

        let body = response.text().await.map_err(transport_error)?;
        // bitcoind reports JSON-RPC errors with HTTP 500 and a regular response body
        let parsed: JsonRpcResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_server_error() => {
                return Err(LedgerError::TransientRpc(format!(
                    "{} returned HTTP {}: {}",
                    request.method, status, e
                )));
            }
            Err(e) => {
                return Err(LedgerError::Protocol(format!(
                    "{} returned undecodable body (HTTP {}): {}",
                    request.method, status, e
                )));
            }
        };

        if let Some(error) = parsed.error {
            debug!(
                "[RPC] {} error {}: {}",
                request.method, error.code, error.message
            );
            return Err(match error.code {
                RPC_INVALID_ADDRESS_OR_KEY => LedgerError::NotFound(format!(
                    "{}: {}",
                    request.method, error.message
                )),
                RPC_IN_WARMUP => LedgerError::TransientRpc(format!(
                    "{}: {}",
                    request.method, error.message
                )),
                code => LedgerError::Protocol(format!(
                    "{} failed with code {}: {}",
                    request.method, code, error.message
                )),
            });
        }

        match parsed.result {
            Some(Value::Null) | None => Err(LedgerError::Protocol(format!(
                "{} returned no result",
                request.method
            ))),
            Some(value) => Ok(value),
        }
    }

    async fn call_decode<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> LedgerResult<T> {
        let value = self.call(method, params).await?;
        decode(method, value)
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> LedgerResult<T> {
    serde_json::from_value(value)
        .map_err(|e| LedgerError::Protocol(format!("{method}: malformed result: {e}")))
}

fn transport_error(err: reqwest::Error) -> LedgerError {
    if is_transient_transport_error(&err) {
        LedgerError::TransientRpc(err.to_string())
    } else {
        LedgerError::Protocol(err.to_string())
    }
}

fn is_transient_transport_error(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        return true;
    }

    let msg = err.to_string().to_lowercase();
    msg.contains("connection closed")
        || msg.contains("connection reset")
        || msg.contains("broken pipe")
        || msg.contains("unexpected eof")
        || msg.contains("incomplete")
}

#[derive(Debug, Deserialize)]
struct IdentityHistoryResponse {
    #[serde(default)]
    fullyqualifiedname: Option<String>,
    #[serde(default)]
    identity: Option<IdentityDefinition>,
    #[serde(default)]
    history: Vec<IdentityRevision>,
}

#[derive(Debug, Deserialize)]
struct IdentityDefinition {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdentityRevision {
    #[serde(default)]
    height: Option<u64>,
}

impl From<IdentityHistoryResponse> for IdentityHistory {
    fn from(response: IdentityHistoryResponse) -> Self {
        let name = response
            .fullyqualifiedname
            .or_else(|| response.identity.and_then(|identity| identity.name));
        let first_seen_height = response.history.iter().filter_map(|rev| rev.height).min();
        Self {
            name,
            first_seen_height,
        }
    }
}

#[async_trait::async_trait]
impl ChainSource for DaemonRpcClient {
    async fn block_count(&self) -> LedgerResult<u64> {
        self.call_decode("getblockcount", vec![]).await
    }

    async fn block_hash(&self, height: u64) -> LedgerResult<String> {
        self.call_decode("getblockhash", vec![json!(height)]).await
    }

    async fn block(&self, hash: &str, full_detail: bool) -> LedgerResult<RawBlock> {
        if full_detail {
            self.call_decode("getblock", vec![json!(hash), json!(2)])
                .await
        } else {
            self.call_decode::<BlockSummary>("getblock", vec![json!(hash), json!(1)])
                .await
                .map(RawBlock::from)
        }
    }

    async fn address_utxos(&self, addresses: &[String]) -> LedgerResult<Vec<AddressUtxo>> {
        self.call_decode(
            "getaddressutxos",
            vec![json!({ "addresses": addresses })],
        )
        .await
    }

    async fn raw_transaction(&self, txid: &str) -> LedgerResult<RawTransaction> {
        self.call_decode("getrawtransaction", vec![json!(txid), json!(1)])
            .await
    }

    async fn identity_history(&self, address: &str) -> LedgerResult<IdentityHistory> {
        self.call_decode::<IdentityHistoryResponse>("getidentityhistory", vec![json!(address)])
            .await
            .map(IdentityHistory::from)
    }
}
