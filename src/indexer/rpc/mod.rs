pub mod endpoint;
pub mod http;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::B256;
use async_trait::async_trait;

use crate::metrics::Metrics;
use crate::models::datasets::blocks::RpcBlock;
use crate::models::datasets::transactions::RpcReceipt;
use crate::models::errors::RpcError;
use crate::utils::rate_limiter::RateLimiter;
use crate::utils::retry::{RetryPolicy, Transient, retry};

pub use endpoint::{ResolvedEndpoint, connect, resolve_endpoint};
pub use http::HttpChainClient;

/// Single-attempt access to a C-Chain JSON-RPC endpoint.
///
/// Implementations do not retry or time out on their own; [`RpcClient`]
/// layers both on top.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Block with full transaction objects.
    async fn block_by_number(&self, number: u64) -> Result<RpcBlock, RpcError>;

    async fn transaction_receipt(&self, hash: B256) -> Result<RpcReceipt, RpcError>;

    async fn block_receipts(&self, number: u64) -> Result<Vec<RpcReceipt>, RpcError>;

    /// Called after a transient failure, before the next attempt.
    fn on_transient_failure(&self) {}
}

/// Timeout, retry and pacing around a [`ChainClient`].
pub struct RpcClient<C> {
    client: C,
    policy: RetryPolicy,
    timeout: Duration,
    limiter: Option<RateLimiter>,
    metrics: Option<Arc<Metrics>>,
}

impl<C: ChainClient> RpcClient<C> {
    pub fn new(client: C, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            client,
            policy,
            timeout,
            limiter: None,
            metrics: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn inner(&self) -> &C {
        &self.client
    }

    pub async fn get_latest_block_number(&self) -> Result<u64, RpcError> {
        self.call("eth_blockNumber", || self.client.block_number()).await
    }

    pub async fn get_block(&self, number: u64) -> Result<RpcBlock, RpcError> {
        self.call("eth_getBlockByNumber", || self.client.block_by_number(number))
            .await
    }

    pub async fn get_transaction_receipt(&self, hash: B256) -> Result<RpcReceipt, RpcError> {
        self.call("eth_getTransactionReceipt", || {
            self.client.transaction_receipt(hash)
        })
        .await
    }

    pub async fn get_block_receipts(&self, number: u64) -> Result<Vec<RpcReceipt>, RpcError> {
        self.call("eth_getBlockReceipts", || self.client.block_receipts(number))
            .await
    }

    async fn call<T, F, Fut>(&self, method: &'static str, request: F) -> Result<T, RpcError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        retry(|| self.attempt(method, request()), &self.policy, method)
            .await
            .map_err(|attempted| {
                if attempted.error.is_transient() {
                    RpcError::Exhausted {
                        method,
                        attempts: attempted.attempts,
                        source: Box::new(attempted.error),
                    }
                } else {
                    attempted.error
                }
            })
    }

    async fn attempt<T, Fut>(&self, method: &'static str, request: Fut) -> Result<T, RpcError>
    where
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let permit = match &self.limiter {
            Some(limiter) => Some(
                limiter
                    .acquire()
                    .await
                    .map_err(|e| RpcError::Connection(format!("rate limiter closed: {e}")))?,
            ),
            None => None,
        };

        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                method,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };

        if let Some(permit) = permit {
            permit.record_result(matches!(&result, Err(e) if e.is_rate_limited()));
        }

        // Record metrics if enabled
        if let Some(metrics) = &self.metrics {
            metrics.record_rpc(method, start.elapsed(), result.is_err());
        }

        if let Err(e) = &result {
            if e.is_transient() {
                self.client.on_transient_failure();
            }
        }

        result
    }
}
