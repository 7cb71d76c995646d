use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("start block {next_block} is ahead of the chain tip {tip}")]
    InvalidStartBlock { next_block: u64, tip: u64 },
    #[error("run {0} no longer exists")]
    RunNotFound(i64),
    #[error("chain client error: {0}")]
    Rpc(#[from] RpcError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{method} transport failure: {reason}")]
    Transport { method: &'static str, reason: String },
    #[error("{method} timed out after {waited_ms}ms")]
    Timeout { method: &'static str, waited_ms: u64 },
    #[error("block {0} not found")]
    BlockNotFound(String),
    #[error("{method} returned an undecodable response: {reason}")]
    Decode { method: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{context} failed: {reason}")]
    Sqlite { context: String, reason: String },
    #[error("{context} read a corrupt row: {reason}")]
    Corrupt { context: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
