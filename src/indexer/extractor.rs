use crate::chain::{BlockRef, ChainClient, PrestateDiffTrace};
use crate::error::RpcError;
use crate::layout::LayoutRegistry;
use crate::storage::StorageEntry;
use alloy::primitives::{Address, B256};

/// Turns diff-mode prestate traces into slot-level [`StorageEntry`] values.
#[derive(Debug, Clone, Default)]
pub struct TraceExtractor {
    layouts: LayoutRegistry,
}

/// Entries contributed by one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEntries {
    pub tx_hash: B256,
    pub entries: Vec<StorageEntry>,
}

impl TraceExtractor {
    pub fn new(layouts: LayoutRegistry) -> Self {
        Self { layouts }
    }

    /// Fetches `block_number` and returns a cursor over its transactions.
    ///
    /// Traces are requested lazily as the cursor advances. An empty `dirty`
    /// set yields an exhausted cursor without touching the node.
    pub async fn extract<'a, C>(
        &'a self,
        chain: &'a C,
        block_number: u64,
        dirty: &[Address],
    ) -> Result<BlockTraceCursor<'a, C>, RpcError>
    where
        C: ChainClient + ?Sized,
    {
        let transactions = if dirty.is_empty() {
            Vec::new()
        } else {
            chain.block(BlockRef::Number(block_number)).await?.transactions
        };
        tracing::debug!(
            "[TRACE] Block {} has {} transaction(s) to inspect for {} dirty contract(s).",
            block_number,
            transactions.len(),
            dirty.len()
        );
        Ok(BlockTraceCursor {
            chain,
            extractor: self,
            block_number,
            dirty: dirty.to_vec(),
            transactions: transactions.into_iter(),
        })
    }

    /// Entries for every dirty contract present in the trace's post state.
    ///
    /// A missing account entry or a missing `storage` field contributes nothing.
    pub fn entries_from_trace(
        &self,
        trace: &PrestateDiffTrace,
        dirty: &[Address],
        block_number: u64,
    ) -> Vec<StorageEntry> {
        let mut entries = Vec::new();
        for contract in dirty {
            let Some(storage) = trace.storage_of(contract) else {
                continue;
            };
            for (slot, value) in storage {
                entries.push(StorageEntry {
                    slot: slot.0,
                    contract: *contract,
                    value: value.0,
                    block_number,
                    metadata: self.layouts.metadata_for(contract, &slot.0),
                });
            }
        }
        entries
    }
}

/// Lazy, single-pass walk over one block's transactions.
pub struct BlockTraceCursor<'a, C: ?Sized> {
    chain: &'a C,
    extractor: &'a TraceExtractor,
    block_number: u64,
    dirty: Vec<Address>,
    transactions: std::vec::IntoIter<B256>,
}

impl<C> BlockTraceCursor<'_, C>
where
    C: ChainClient + ?Sized,
{
    pub fn remaining(&self) -> usize {
        self.transactions.len()
    }

    /// Traces the next transaction in block order; `None` once the block is exhausted.
    pub async fn next_transaction(&mut self) -> Result<Option<TransactionEntries>, RpcError> {
        let Some(tx_hash) = self.transactions.next() else {
            return Ok(None);
        };
        let trace = self.chain.trace_prestate_diff(tx_hash).await?;
        let entries = self
            .extractor
            .entries_from_trace(&trace, &self.dirty, self.block_number);
        if !entries.is_empty() {
            tracing::debug!(
                "[TRACE] {:#x} in block {} changed {} watched slot(s).",
                tx_hash,
                self.block_number,
                entries.len()
            );
        }
        Ok(Some(TransactionEntries { tx_hash, entries }))
    }

    /// Drains the cursor into a single vector.
    pub async fn collect_all(mut self) -> Result<Vec<StorageEntry>, RpcError> {
        let mut all = Vec::new();
        while let Some(tx) = self.next_transaction().await? {
            all.extend(tx.entries);
        }
        Ok(all)
    }
}
