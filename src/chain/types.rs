//! Statically typed shapes of the JSON-RPC responses the indexer consumes.
//!
//! Only the fields the indexer reads are declared; everything else in the node
//! response is ignored by serde.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Block selector for `eth_getBlockByNumber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Latest,
}

impl BlockRef {
    pub fn tag(self) -> String {
        match self {
            BlockRef::Number(n) => crate::utils::block_tag(n),
            BlockRef::Latest => "latest".to_string(),
        }
    }
}

impl From<u64> for BlockRef {
    fn from(number: u64) -> Self {
        BlockRef::Number(number)
    }
}

/// A 32-byte storage slot or value as reported by a node.
///
/// Nodes normally return full-width words, but quantity-style short hex
/// (`"0x1"`, `"0x01"`) is accepted and left-padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StorageWord(pub B256);

impl StorageWord {
    pub fn from_u64(value: u64) -> Self {
        Self(B256::from(U256::from(value).to_be_bytes::<32>()))
    }
}

impl From<B256> for StorageWord {
    fn from(word: B256) -> Self {
        Self(word)
    }
}

impl From<StorageWord> for B256 {
    fn from(word: StorageWord) -> Self {
        word.0
    }
}

impl fmt::Display for StorageWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for StorageWord {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return Ok(Self(B256::ZERO));
        }
        if digits.len() > 64 {
            return Err(format!("storage word `{trimmed}` is wider than 32 bytes"));
        }
        U256::from_str_radix(digits, 16)
            .map(|value| Self(B256::from(value.to_be_bytes::<32>())))
            .map_err(|e| format!("storage word `{trimmed}` is not hex: {e}"))
    }
}

impl<'de> Deserialize<'de> for StorageWord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for StorageWord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// `eth_getProof` result; the indexer only needs the storage trie root.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProofRoot {
    pub storage_hash: B256,
}

/// `eth_getBlockByNumber(tag, false)` result.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockTransactions {
    #[serde(default)]
    pub transactions: Vec<B256>,
}

/// `debug_traceTransaction` result under `prestateTracer` with `diffMode`.
///
/// The `pre` section is not decoded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrestateDiffTrace {
    #[serde(default)]
    pub post: BTreeMap<Address, AccountDiff>,
}

impl PrestateDiffTrace {
    pub fn storage_of(&self, contract: &Address) -> Option<&BTreeMap<StorageWord, StorageWord>> {
        self.post.get(contract).and_then(|diff| diff.storage.as_ref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountDiff {
    #[serde(default)]
    pub storage: Option<BTreeMap<StorageWord, StorageWord>>,
}
