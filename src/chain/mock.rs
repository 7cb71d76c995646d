use crate::chain::types::{AccountDiff, BlockRef, BlockTransactions, PrestateDiffTrace, StorageWord};
use crate::chain::ChainClient;
use crate::error::RpcError;
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Every call made against a [`MockChain`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    LatestBlockNumber,
    StorageRoot(Address, u64),
    Block(BlockRef),
    Trace(B256),
}

#[derive(Default)]
struct MockChainState {
    tip: u64,
    roots: HashMap<Address, BTreeMap<u64, B256>>,
    blocks: BTreeMap<u64, Vec<B256>>,
    traces: HashMap<B256, PrestateDiffTrace>,
    failing_roots: HashMap<Address, u64>,
    failing_traces: Vec<B256>,
    failing_tip: bool,
    calls: Vec<MockCall>,
}

/// Scriptable in-memory chain for dev/test runs.
///
/// Storage roots are step functions: a root set for `(contract, block)` holds
/// for every later block until another root is set. Contracts with no root set
/// report `B256::ZERO`. Blocks with no transactions registered are empty.
#[derive(Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<MockChainState>>,
}

impl MockChain {
    pub fn new(tip: u64) -> Self {
        let chain = Self::default();
        chain.set_tip(tip);
        chain
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockChainState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_tip(&self, tip: u64) {
        self.state().tip = tip;
    }

    pub fn set_root(&self, contract: Address, from_block: u64, root: B256) {
        self.state()
            .roots
            .entry(contract)
            .or_default()
            .insert(from_block, root);
    }

    /// Appends a transaction to `block` and registers its trace.
    pub fn push_transaction(&self, block: u64, tx_hash: B256, trace: PrestateDiffTrace) {
        let mut state = self.state();
        state.blocks.entry(block).or_default().push(tx_hash);
        state.traces.insert(tx_hash, trace);
    }

    pub fn fail_storage_root(&self, contract: Address, block: u64) {
        self.state().failing_roots.insert(contract, block);
    }

    pub fn fail_tip(&self, failing: bool) {
        self.state().failing_tip = failing;
    }

    pub fn fail_trace(&self, tx_hash: B256) {
        self.state().failing_traces.push(tx_hash);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn trace_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::Trace(_)))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

/// Builds a diff-mode trace whose post state touches `contract` with `slots`.
pub fn storage_trace(contract: Address, slots: &[(u64, u64)]) -> PrestateDiffTrace {
    let storage = slots
        .iter()
        .map(|(slot, value)| (StorageWord::from_u64(*slot), StorageWord::from_u64(*value)))
        .collect();
    let mut post = BTreeMap::new();
    post.insert(
        contract,
        AccountDiff {
            storage: Some(storage),
        },
    );
    PrestateDiffTrace { post }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        let mut state = self.state();
        state.calls.push(MockCall::LatestBlockNumber);
        if state.failing_tip {
            return Err(RpcError::Transport {
                method: "eth_blockNumber",
                reason: "scripted failure".to_string(),
            });
        }
        Ok(state.tip)
    }

    async fn storage_root(&self, contract: Address, block_number: u64) -> Result<B256, RpcError> {
        let mut state = self.state();
        state.calls.push(MockCall::StorageRoot(contract, block_number));
        if state.failing_roots.get(&contract) == Some(&block_number) {
            return Err(RpcError::Transport {
                method: "eth_getProof",
                reason: format!("scripted failure for {contract:#x} at {block_number}"),
            });
        }
        let root = state
            .roots
            .get(&contract)
            .and_then(|history| history.range(..=block_number).next_back())
            .map(|(_, root)| *root)
            .unwrap_or(B256::ZERO);
        Ok(root)
    }

    async fn block(&self, block: BlockRef) -> Result<BlockTransactions, RpcError> {
        let mut state = self.state();
        state.calls.push(MockCall::Block(block));
        let number = match block {
            BlockRef::Number(n) => n,
            BlockRef::Latest => state.tip,
        };
        if number > state.tip {
            return Err(RpcError::BlockNotFound(block.tag()));
        }
        Ok(BlockTransactions {
            transactions: state.blocks.get(&number).cloned().unwrap_or_default(),
        })
    }

    async fn trace_prestate_diff(&self, tx_hash: B256) -> Result<PrestateDiffTrace, RpcError> {
        let mut state = self.state();
        state.calls.push(MockCall::Trace(tx_hash));
        if state.failing_traces.contains(&tx_hash) {
            return Err(RpcError::Transport {
                method: "debug_traceTransaction",
                reason: format!("scripted failure for {tx_hash:#x}"),
            });
        }
        Ok(state.traces.get(&tx_hash).cloned().unwrap_or_default())
    }
}
