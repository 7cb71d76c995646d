use crate::chain::ChainClient;
use crate::config::IndexerConfig;
use crate::error::Result;
use crate::indexer::clock::Clock;
use crate::indexer::detector::ChangeDetector;
use crate::indexer::extractor::TraceExtractor;
use crate::indexer::run_tracker::{RunRequest, RunTracker};
use crate::storage::{EntryStore, Run, RunStore};
use alloy::primitives::Address;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// `current <= tip`: the next step processes a block.
    CatchingUp,
    /// `current > tip`: the next step sleeps and re-reads the tip.
    Synced,
}

/// Outcome of one processed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReport {
    pub block: u64,
    pub dirty: Vec<Address>,
    pub entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Processed(BlockReport),
    Waited { tip: u64 },
}

/// Drives one run block by block until the process stops or an error escapes.
///
/// Blocks are processed strictly in order and one at a time. A block counts as
/// processed only after every entry it produced is stored and the run has been
/// advanced, so restarting after any failure reprocesses that same block.
pub struct IndexingLoop<C, S, K> {
    chain: C,
    store: Arc<S>,
    tracker: RunTracker<S>,
    clock: K,
    detector: ChangeDetector,
    extractor: TraceExtractor,
    run: Run,
    current: u64,
    tip: u64,
    state: LoopState,
    poll_interval: Duration,
}

impl<C, S, K> IndexingLoop<C, S, K>
where
    C: ChainClient,
    S: RunStore + EntryStore,
    K: Clock,
{
    /// Reads the tip, resumes or creates the run, and picks the initial state.
    ///
    /// Fails with `InvalidStartBlock` before any run is written when the
    /// requested start lies beyond the tip.
    pub async fn start(chain: C, store: Arc<S>, clock: K, config: &IndexerConfig) -> Result<Self> {
        let tip = chain.latest_block_number().await?;
        let tracker = RunTracker::new(Arc::clone(&store));
        let session = tracker.resume_or_create(
            &RunRequest {
                run_id: config.run_id,
                start_block: config.start_block,
                contracts: config.contracts.clone(),
            },
            tip,
        )?;

        let state = if session.next_block <= tip {
            LoopState::CatchingUp
        } else {
            LoopState::Synced
        };
        tracing::info!(
            "[INDEXER] Run {} watching {} contract(s); next block {} / tip {} ({:?}).",
            session.run.id,
            session.run.contracts.len(),
            session.next_block,
            tip,
            state
        );

        Ok(Self {
            chain,
            store,
            tracker,
            clock,
            detector: ChangeDetector::new(&session.run.contracts),
            extractor: TraceExtractor::new(config.layouts.clone()),
            run: session.run,
            current: session.next_block,
            tip,
            state,
            poll_interval: config.poll_interval,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The next block the loop will process.
    pub fn current_block(&self) -> u64 {
        self.current
    }

    pub fn tip(&self) -> u64 {
        self.tip
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    /// Performs exactly one state transition.
    ///
    /// On error the root cache is reset, so a caller that keeps stepping
    /// re-detects every contract at the failed block.
    pub async fn step(&mut self) -> Result<Step> {
        let result = match self.state {
            LoopState::CatchingUp => self.process_current().await.map(Step::Processed),
            LoopState::Synced => self.wait_for_tip().await.map(|tip| Step::Waited { tip }),
        };
        if let Err(err) = &result {
            match self.state {
                LoopState::CatchingUp => {
                    tracing::warn!("[INDEXER] Block {} failed: {}", self.current, err);
                    if self.current == self.run.start_block
                        && self.run.last_processed_block == self.run.start_block
                    {
                        tracing::warn!(
                            "[RUN] Run {} is recorded at its start block {}; resuming it continues from block {}.",
                            self.run.id,
                            self.run.start_block,
                            self.run.start_block.saturating_add(1)
                        );
                    }
                }
                LoopState::Synced => {
                    tracing::warn!(
                        "[INDEXER] Tip refresh failed while synced at block {}: {}",
                        self.current,
                        err
                    );
                }
            }
            self.detector.invalidate();
        }
        result
    }

    /// Steps until an error escapes.
    pub async fn run_forever(&mut self) -> Result<()> {
        loop {
            self.step().await?;
        }
    }

    async fn process_current(&mut self) -> Result<BlockReport> {
        let block = self.current;
        let started = self.clock.now();

        let dirty = self
            .detector
            .detect(&self.chain, &self.run.contracts, block)
            .await?;

        let mut written = 0usize;
        if !dirty.is_empty() {
            let mut cursor = self.extractor.extract(&self.chain, block, &dirty).await?;
            while let Some(tx) = cursor.next_transaction().await? {
                for entry in &tx.entries {
                    self.store.upsert_entry(entry)?;
                    written += 1;
                }
            }
        }

        self.tracker.advance(self.run.id, block)?;
        self.run.last_processed_block = block;
        self.current = block.saturating_add(1);
        if self.current > self.tip {
            self.state = LoopState::Synced;
        }

        let elapsed = self.clock.now().saturating_sub(started);
        if dirty.is_empty() {
            tracing::debug!("[INDEXER] Block {} clean ({:?}).", block, elapsed);
        } else {
            tracing::info!(
                "[INDEXER] Block {}: {} dirty contract(s), {} entr{} written in {:?}.",
                block,
                dirty.len(),
                written,
                if written == 1 { "y" } else { "ies" },
                elapsed
            );
        }

        Ok(BlockReport {
            block,
            dirty,
            entries: written,
        })
    }

    async fn wait_for_tip(&mut self) -> Result<u64> {
        self.clock.sleep(self.poll_interval).await;
        let tip = self.chain.latest_block_number().await?;
        self.tip = tip;
        if self.current <= tip {
            tracing::info!(
                "[INDEXER] Tip advanced to {}; catching up from block {}.",
                tip,
                self.current
            );
            self.state = LoopState::CatchingUp;
        } else {
            tracing::debug!("[INDEXER] Still synced at tip {}.", tip);
        }
        Ok(tip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{storage_trace, MockCall};
    use crate::chain::MockChain;
    use crate::indexer::clock::ManualClock;
    use crate::storage::{IndexDb, StoreConfig};
    use alloy::primitives::B256;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_db_path(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{}_{}.db", prefix, nanos))
    }

    fn config(contract: Address, start_block: u64) -> IndexerConfig {
        IndexerConfig::new("http://localhost:8545", &format!("{contract:#x}"))
            .expect("config")
            .with_start_block(start_block)
    }

    #[tokio::test]
    async fn test_catches_up_then_waits() {
        let path = temp_db_path("engine_catch_up");
        let db = Arc::new(IndexDb::open(&StoreConfig::new(&path)).expect("open db"));
        let contract = Address::from([0x11; 20]);
        let chain = MockChain::new(2);
        chain.set_root(contract, 0, B256::with_last_byte(1));
        let clock = ManualClock::new();

        let mut indexer = IndexingLoop::start(chain.clone(), db, clock.clone(), &config(contract, 1))
            .await
            .expect("start");
        assert_eq!(indexer.state(), LoopState::CatchingUp);

        let first = indexer.step().await.expect("block 1");
        assert_eq!(
            first,
            Step::Processed(BlockReport {
                block: 1,
                dirty: vec![contract],
                entries: 0
            })
        );
        let second = indexer.step().await.expect("block 2");
        assert!(matches!(second, Step::Processed(BlockReport { block: 2, ref dirty, .. }) if dirty.is_empty()));
        assert_eq!(indexer.state(), LoopState::Synced);
        assert_eq!(indexer.tip(), 2);

        assert_eq!(indexer.step().await.expect("wait"), Step::Waited { tip: 2 });
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10)]);
        assert_eq!(indexer.run().last_processed_block, 2);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_failed_block_is_retried_with_fresh_roots() {
        let path = temp_db_path("engine_retry");
        let db = Arc::new(IndexDb::open(&StoreConfig::new(&path)).expect("open db"));
        let contract = Address::from([0x11; 20]);
        let chain = MockChain::new(3);
        chain.push_transaction(3, B256::with_last_byte(0xf0), storage_trace(contract, &[(1, 2)]));
        chain.fail_trace(B256::with_last_byte(0xf0));

        let mut indexer =
            IndexingLoop::start(chain.clone(), Arc::clone(&db), ManualClock::new(), &config(contract, 3))
                .await
                .expect("start");
        assert!(indexer.step().await.is_err());
        assert_eq!(indexer.current_block(), 3);
        assert_eq!(indexer.state(), LoopState::CatchingUp);
        assert_eq!(db.fetch_run(indexer.run().id).unwrap().unwrap().last_processed_block, 3);

        chain.clear_calls();
        assert!(indexer.step().await.is_err());
        assert!(chain.calls().contains(&MockCall::Trace(B256::with_last_byte(0xf0))));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_failed_tip_refresh_stays_synced() {
        let path = temp_db_path("engine_tip_refresh");
        let db = Arc::new(IndexDb::open(&StoreConfig::new(&path)).expect("open db"));
        let contract = Address::from([0x11; 20]);
        let run_id = db.create_run(0, 4, &[contract]).expect("create run");
        let chain = MockChain::new(4);
        let clock = ManualClock::new();

        let mut indexer = IndexingLoop::start(
            chain.clone(),
            Arc::clone(&db),
            clock.clone(),
            &config(contract, 0).with_run_id(run_id),
        )
        .await
        .expect("start");
        assert_eq!(indexer.state(), LoopState::Synced);

        chain.fail_tip(true);
        assert!(indexer.step().await.is_err());
        assert_eq!(indexer.state(), LoopState::Synced);
        assert_eq!(indexer.current_block(), 5);
        assert_eq!(clock.sleep_count(), 1);

        chain.fail_tip(false);
        chain.set_tip(5);
        assert_eq!(indexer.step().await.expect("refresh"), Step::Waited { tip: 5 });
        assert_eq!(indexer.state(), LoopState::CatchingUp);

        let _ = std::fs::remove_file(path);
    }
}
