use crate::chain::types::{BlockRef, BlockTransactions, PrestateDiffTrace, StorageProofRoot};
use crate::chain::ChainClient;
use crate::error::RpcError;
use crate::utils::{block_tag, compact_error_message};
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::http::Http;
use alloy::transports::TransportError;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::fmt::Debug;
use tokio::time::{timeout, Duration};

const RPC_ERR_MAX_LEN: usize = 260;

pub type HttpProvider = RootProvider<Http<Client>>;

/// JSON-RPC chain client backed by an alloy HTTP provider.
///
/// Responses are requested raw and decoded into the narrow schemas in
/// [`crate::chain::types`], so unrelated fields a node adds or omits cannot
/// break decoding.
#[derive(Clone)]
pub struct RpcChainClient {
    provider: HttpProvider,
    request_timeout: Duration,
}

impl RpcChainClient {
    pub fn new(rpc_url: Url, request_timeout: Duration) -> Self {
        Self {
            provider: ProviderBuilder::new().on_http(rpc_url),
            request_timeout,
        }
    }

    async fn request<R>(&self, method: &'static str, params: serde_json::Value) -> Result<R, RpcError>
    where
        R: DeserializeOwned + Debug + Send + Sync + Unpin + 'static,
    {
        tracing::debug!("[RPC] {} {}", method, params);
        let call = self
            .provider
            .raw_request::<_, R>(Cow::Borrowed(method), params);
        match timeout(self.request_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify_transport_error(method, err)),
            Err(_) => Err(RpcError::Timeout {
                method,
                waited_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

fn classify_transport_error(method: &'static str, err: TransportError) -> RpcError {
    let reason = compact_error_message(&err.to_string(), RPC_ERR_MAX_LEN);
    match err {
        alloy::transports::RpcError::DeserError { .. } => RpcError::Decode { method, reason },
        _ => RpcError::Transport { method, reason },
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        let method = "eth_blockNumber";
        match timeout(self.request_timeout, self.provider.get_block_number()).await {
            Ok(Ok(number)) => Ok(number),
            Ok(Err(err)) => Err(classify_transport_error(method, err)),
            Err(_) => Err(RpcError::Timeout {
                method,
                waited_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }

    async fn storage_root(&self, contract: Address, block_number: u64) -> Result<B256, RpcError> {
        let proof: StorageProofRoot = self
            .request(
                "eth_getProof",
                serde_json::json!([
                    format!("{contract:#x}"),
                    Vec::<String>::new(),
                    block_tag(block_number)
                ]),
            )
            .await?;
        Ok(proof.storage_hash)
    }

    async fn block(&self, block: BlockRef) -> Result<BlockTransactions, RpcError> {
        let tag = block.tag();
        let found: Option<BlockTransactions> = self
            .request("eth_getBlockByNumber", serde_json::json!([tag, false]))
            .await?;
        found.ok_or(RpcError::BlockNotFound(tag))
    }

    async fn trace_prestate_diff(&self, tx_hash: B256) -> Result<PrestateDiffTrace, RpcError> {
        self.request(
            "debug_traceTransaction",
            serde_json::json!([
                format!("{tx_hash:#x}"),
                {
                    "tracer": "prestateTracer",
                    "tracerConfig": { "diffMode": true }
                }
            ]),
        )
        .await
    }
}
