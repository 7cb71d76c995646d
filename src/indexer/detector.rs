use crate::chain::ChainClient;
use crate::error::RpcError;
use crate::indexer::root_cache::StorageRootCache;
use alloy::primitives::{Address, B256};

/// Decides which contracts need trace inspection at a block by comparing
/// storage roots against [`StorageRootCache`].
#[derive(Debug, Default)]
pub struct ChangeDetector {
    cache: StorageRootCache,
}

impl ChangeDetector {
    pub fn new(contracts: &[Address]) -> Self {
        Self {
            cache: StorageRootCache::new(contracts),
        }
    }

    pub(crate) fn cache(&self) -> &StorageRootCache {
        &self.cache
    }

    /// Returns the dirty subset of `contracts`, in input order.
    ///
    /// Roots are fetched one contract at a time. The cache is only updated once
    /// every root for the block has been fetched, so a failed detection leaves
    /// it exactly as it was.
    pub async fn detect<C>(
        &mut self,
        chain: &C,
        contracts: &[Address],
        block_number: u64,
    ) -> Result<Vec<Address>, RpcError>
    where
        C: ChainClient + ?Sized,
    {
        let mut observed: Vec<(Address, B256)> = Vec::with_capacity(contracts.len());
        for contract in contracts {
            let root = chain.storage_root(*contract, block_number).await?;
            observed.push((*contract, root));
        }

        let mut dirty = Vec::new();
        for (contract, root) in observed {
            if self.cache.differs(&contract, root) {
                tracing::debug!(
                    "[DETECT] {:#x} storage root changed at block {}: {:#x}",
                    contract,
                    block_number,
                    root
                );
                dirty.push(contract);
            }
            self.cache.record(contract, root);
        }
        Ok(dirty)
    }

    /// Forces the next detection to treat every contract as dirty.
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }
}
