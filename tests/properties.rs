use alloy::primitives::{Address, B256};
use indexooor::chain::mock::storage_trace;
use indexooor::chain::MockChain;
use indexooor::config::IndexerConfig;
use indexooor::indexer::{IndexingLoop, LoopState, ManualClock, Step};
use indexooor::storage::{EntryStore, IndexDb, SlotMetadata, StorageEntry, StoreConfig};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, TestCaseError, TestRunner};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

static CASE: AtomicU64 = AtomicU64::new(0);

fn temp_db_path(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let case = CASE.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("{}_{}_{}.db", prefix, nanos, case))
}

fn check(condition: bool, message: String) -> Result<(), TestCaseError> {
    if condition {
        Ok(())
    } else {
        Err(TestCaseError::fail(message))
    }
}

#[test]
fn test_upsert_keeps_only_latest_value_per_key() {
    let mut runner = TestRunner::new(ProptestConfig {
        cases: 48,
        ..ProptestConfig::default()
    });
    let contracts = [Address::from([0x11; 20]), Address::from([0x22; 20])];
    let writes = prop::collection::vec((0u8..4, 0usize..2, any::<u8>()), 1..24);

    let result = runner.run(&writes, |writes| {
        let path = temp_db_path("prop_upsert");
        let db = IndexDb::open(&StoreConfig::new(&path))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let mut expected: BTreeMap<(u8, usize), (u8, u64)> = BTreeMap::new();
        for (block, (slot, contract, value)) in writes.iter().enumerate() {
            let block = block as u64;
            db.upsert_entry(&StorageEntry {
                slot: B256::with_last_byte(*slot),
                contract: contracts[*contract],
                value: B256::with_last_byte(*value),
                block_number: block,
                metadata: SlotMetadata::default(),
            })
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
            expected.insert((*slot, *contract), (*value, block));
        }

        let count = db
            .entry_count()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        check(
            count == expected.len() as u64,
            format!("{count} rows for {} keys", expected.len()),
        )?;
        for ((slot, contract), (value, block)) in &expected {
            let stored = db
                .entry(B256::with_last_byte(*slot), contracts[*contract])
                .map_err(|e| TestCaseError::fail(e.to_string()))?
                .ok_or_else(|| TestCaseError::fail(format!("slot {slot} missing")))?;
            check(
                stored.value == B256::with_last_byte(*value) && stored.block_number == *block,
                format!("slot {slot} kept a stale value"),
            )?;
        }

        let _ = std::fs::remove_file(&path);
        Ok(())
    });

    if let Err(err) = result {
        panic!("upsert law proptest failed: {err}");
    }
}

#[test]
fn test_processed_blocks_are_strictly_increasing_without_gaps() {
    let mut runner = TestRunner::new(ProptestConfig {
        cases: 32,
        ..ProptestConfig::default()
    });
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let contract = Address::from([0x33; 20]);
    let strategy = (0u64..12, 0u64..12, 0u64..8, prop::collection::vec(0u64..32, 0..8));

    let result = runner.run(&strategy, |(start, span, advance, root_changes)| {
        let tip = start + span;
        let path = temp_db_path("prop_blocks");
        let db = Arc::new(
            IndexDb::open(&StoreConfig::new(&path))
                .map_err(|e| TestCaseError::fail(e.to_string()))?,
        );
        let chain = MockChain::new(tip);
        for (i, block) in root_changes.iter().enumerate() {
            chain.set_root(contract, *block, B256::with_last_byte(i as u8 + 1));
            chain.push_transaction(
                *block,
                B256::with_last_byte(0x80 + i as u8),
                storage_trace(contract, &[(i as u64, *block)]),
            );
        }
        let clock = ManualClock::new();
        let hook_chain = chain.clone();
        clock.on_sleep(move |count| {
            if count == 1 {
                hook_chain.set_tip(tip + advance);
            }
        });
        let config = IndexerConfig::new("http://localhost:8545", &format!("{contract:#x}"))
            .map_err(|e| TestCaseError::fail(e.to_string()))?
            .with_start_block(start);

        let processed = runtime.block_on(async {
            let mut indexer = IndexingLoop::start(chain.clone(), Arc::clone(&db), clock.clone(), &config)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let mut processed = Vec::new();
            // Two waits: one that sees the advanced tip, one that finds nothing new.
            while clock.sleep_count() < 2 || indexer.state() == LoopState::CatchingUp {
                match indexer
                    .step()
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?
                {
                    Step::Processed(report) => processed.push(report.block),
                    Step::Waited { .. } => {}
                }
            }
            Ok::<_, TestCaseError>(processed)
        })?;

        let expected: Vec<u64> = (start..=tip + advance).collect();
        check(
            processed == expected,
            format!("processed {processed:?}, expected {expected:?}"),
        )?;

        let _ = std::fs::remove_file(&path);
        Ok(())
    });

    if let Err(err) = result {
        panic!("block sequence proptest failed: {err}");
    }
}
