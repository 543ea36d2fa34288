use std::sync::atomic::{AtomicUsize, Ordering};

use alloy_eips::BlockNumberOrTag;
use alloy_json_rpc::RpcError as JsonRpcError;
use alloy_primitives::{B256, U64};
use alloy_rpc_client::{ClientBuilder, RpcClient as JsonRpcClient};
use alloy_transport::{TransportError, TransportErrorKind};
use async_trait::async_trait;
use tracing::warn;
use url::Url;

use crate::indexer::rpc::ChainClient;
use crate::models::datasets::blocks::RpcBlock;
use crate::models::datasets::transactions::RpcReceipt;
use crate::models::errors::RpcError;
use crate::utils::strip_html;

// Returned by some public providers when the request budget is spent
const LIMIT_EXCEEDED_CODE: i64 = -32005;

/// JSON-RPC over HTTP with an ordered list of endpoints.
///
/// Requests go to the active endpoint; a transient failure moves on to the
/// next one.
pub struct HttpChainClient {
    endpoints: Vec<(Url, JsonRpcClient)>,
    active: AtomicUsize,
}

impl HttpChainClient {
    pub fn new(primary: Url, fallbacks: Vec<Url>) -> Self {
        let endpoints = std::iter::once(primary)
            .chain(fallbacks)
            .map(|url| {
                let client = ClientBuilder::default().http(url.clone());
                (url, client)
            })
            .collect();

        Self {
            endpoints,
            active: AtomicUsize::new(0),
        }
    }

    pub fn active_url(&self) -> &Url {
        &self.endpoints[self.active_index()].0
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    fn active_index(&self) -> usize {
        self.active.load(Ordering::Relaxed) % self.endpoints.len()
    }

    fn client(&self) -> &JsonRpcClient {
        &self.endpoints[self.active_index()].1
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let head = self
            .client()
            .request_noparams::<U64>("eth_blockNumber")
            .await
            .map_err(|e| classify("eth_blockNumber", e))?;
        Ok(head.to::<u64>())
    }

    async fn block_by_number(&self, number: u64) -> Result<RpcBlock, RpcError> {
        self.client()
            .request::<_, Option<RpcBlock>>(
                "eth_getBlockByNumber",
                (BlockNumberOrTag::Number(number), true),
            )
            .await
            .map_err(|e| classify("eth_getBlockByNumber", e))?
            .ok_or_else(|| RpcError::NotFound {
                what: format!("block {number}"),
            })
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<RpcReceipt, RpcError> {
        self.client()
            .request::<_, Option<RpcReceipt>>("eth_getTransactionReceipt", (hash,))
            .await
            .map_err(|e| classify("eth_getTransactionReceipt", e))?
            .ok_or_else(|| RpcError::NotFound {
                what: format!("receipt for transaction {hash}"),
            })
    }

    async fn block_receipts(&self, number: u64) -> Result<Vec<RpcReceipt>, RpcError> {
        self.client()
            .request::<_, Option<Vec<RpcReceipt>>>(
                "eth_getBlockReceipts",
                (BlockNumberOrTag::Number(number),),
            )
            .await
            .map_err(|e| classify("eth_getBlockReceipts", e))?
            .ok_or_else(|| RpcError::NotFound {
                what: format!("receipts for block {number}"),
            })
    }

    fn on_transient_failure(&self) {
        if self.endpoints.len() < 2 {
            return;
        }
        let previous = self.active.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        let next = (previous + 1) % self.endpoints.len();
        warn!(
            "Switching RPC endpoint from {} to {}",
            self.endpoints[previous].0, self.endpoints[next].0
        );
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("rate limit")
        || message.contains("limit exceeded")
        || message.contains("too many requests")
}

/// Maps transport errors onto the transient/permanent split the retry layer uses.
pub(crate) fn classify(method: &'static str, error: TransportError) -> RpcError {
    match error {
        JsonRpcError::ErrorResp(payload) => {
            let message = payload.message.to_string();
            if payload.code == 429
                || payload.code == LIMIT_EXCEEDED_CODE
                || is_rate_limit_message(&message)
            {
                RpcError::RateLimited(message)
            } else {
                RpcError::Rpc {
                    code: payload.code,
                    message,
                }
            }
        }
        JsonRpcError::NullResp => RpcError::NotFound {
            what: format!("{method} result"),
        },
        JsonRpcError::DeserError { err, .. } => RpcError::Malformed {
            method,
            reason: err.to_string(),
        },
        JsonRpcError::Transport(TransportErrorKind::HttpError(http)) if http.status == 429 => {
            RpcError::RateLimited(strip_html(&http.body))
        }
        JsonRpcError::Transport(kind) => RpcError::Connection(strip_html(&kind.to_string())),
        other => RpcError::Connection(other.to_string()),
    }
}
