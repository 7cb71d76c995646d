use alloy::primitives::{Address, B256};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedRoot {
    /// Not observed in this process yet; the next check always reports a change.
    Unknown,
    Known(B256),
}

/// Last observed storage-trie root per contract. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct StorageRootCache {
    roots: HashMap<Address, CachedRoot>,
}

impl StorageRootCache {
    pub fn new(contracts: &[Address]) -> Self {
        Self {
            roots: contracts
                .iter()
                .map(|contract| (*contract, CachedRoot::Unknown))
                .collect(),
        }
    }

    pub fn get(&self, contract: &Address) -> CachedRoot {
        self.roots
            .get(contract)
            .copied()
            .unwrap_or(CachedRoot::Unknown)
    }

    /// True when `root` differs from the cached root or none is cached.
    pub fn differs(&self, contract: &Address, root: B256) -> bool {
        self.get(contract) != CachedRoot::Known(root)
    }

    pub fn record(&mut self, contract: Address, root: B256) {
        self.roots.insert(contract, CachedRoot::Known(root));
    }

    /// Forgets every observed root.
    pub fn invalidate(&mut self) {
        for root in self.roots.values_mut() {
            *root = CachedRoot::Unknown;
        }
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
