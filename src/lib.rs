//! Incremental contract storage indexer.
//!
//! For every block the indexer asks the node for each watched contract's
//! storage root. Only contracts whose root moved are traced, and only their
//! post-state slot values are recorded. Progress is kept in a resumable run so
//! a restarted process continues at the first unfinished block.
//!
//! The entry point is [`indexer::IndexingLoop`]; the chain and the store are
//! reached through the [`chain::ChainClient`] and [`storage::RunStore`] /
//! [`storage::EntryStore`] seams.

pub mod chain;
pub mod config;
pub mod error;
pub mod indexer;
pub mod layout;
pub mod storage;
pub mod utils;
