//! Persistence capability: resumable runs and latest-wins storage entries.

pub mod sqlite;

use crate::error::StoreError;
use alloy::primitives::{Address, B256};
use serde::Serialize;

pub use sqlite::{IndexDb, StoreConfig};

/// A resumable indexing session over a fixed contract set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Run {
    pub id: i64,
    pub start_block: u64,
    pub last_processed_block: u64,
    pub contracts: Vec<Address>,
}

/// Decoded names for a slot, when a storage layout makes them derivable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotMetadata {
    pub variable_name: Option<String>,
    pub key: Option<String>,
    pub deep_key: Option<String>,
    pub struct_var: Option<String>,
}

impl SlotMetadata {
    pub fn is_empty(&self) -> bool {
        self.variable_name.is_none()
            && self.key.is_none()
            && self.deep_key.is_none()
            && self.struct_var.is_none()
    }
}

/// Latest observed value of one `(slot, contract)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageEntry {
    pub slot: B256,
    pub contract: Address,
    pub value: B256,
    pub block_number: u64,
    #[serde(flatten)]
    pub metadata: SlotMetadata,
}

pub trait RunStore: Send + Sync {
    /// Inserts a run and returns the identifier assigned by the store.
    fn create_run(
        &self,
        start_block: u64,
        last_block: u64,
        contracts: &[Address],
    ) -> Result<i64, StoreError>;

    /// Returns the number of rows affected; zero means the run does not exist.
    fn update_run(&self, id: i64, last_block: u64) -> Result<usize, StoreError>;

    fn fetch_run(&self, id: i64) -> Result<Option<Run>, StoreError>;
}

pub trait EntryStore: Send + Sync {
    /// Inserts or overwrites the row keyed by `(entry.slot, entry.contract)`.
    fn upsert_entry(&self, entry: &StorageEntry) -> Result<(), StoreError>;
}
