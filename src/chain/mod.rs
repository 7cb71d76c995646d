//! Chain-client capability consumed by the indexing core.

pub mod mock;
pub mod rpc;
pub mod types;

use crate::error::RpcError;
use alloy::primitives::{Address, B256};
use async_trait::async_trait;

pub use mock::MockChain;
pub use rpc::RpcChainClient;
pub use types::{AccountDiff, BlockRef, BlockTransactions, PrestateDiffTrace, StorageWord};

/// The four node calls the indexer needs.
///
/// Implementations must not retry internally; every failure is surfaced to the
/// caller, which treats it as fatal for the current block.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, RpcError>;

    /// Storage trie root of `contract` at `block_number`. Key-level proof data is ignored.
    async fn storage_root(&self, contract: Address, block_number: u64) -> Result<B256, RpcError>;

    /// Ordered transaction hashes of a block.
    async fn block(&self, block: BlockRef) -> Result<BlockTransactions, RpcError>;

    /// Post-state section of a diff-mode prestate trace.
    async fn trace_prestate_diff(&self, tx_hash: B256) -> Result<PrestateDiffTrace, RpcError>;
}
