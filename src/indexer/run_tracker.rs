use crate::error::{IndexError, Result};
use crate::storage::{Run, RunStore};
use alloy::primitives::Address;
use std::sync::Arc;

/// What the caller asked for; `run_id == 0` means "start a new run".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: i64,
    pub start_block: u64,
    pub contracts: Vec<Address>,
}

/// The run a session works on, plus the first block it must process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSession {
    pub run: Run,
    pub next_block: u64,
    pub resumed: bool,
}

/// Creates, resumes and advances runs through a [`RunStore`].
pub struct RunTracker<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for RunTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> RunTracker<S>
where
    S: RunStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resumes `request.run_id` when it exists, otherwise creates a new run.
    ///
    /// A resumed run is authoritative: its stored contracts and progress win
    /// over the request. A missing run falls back to creation; any other store
    /// failure is returned. The next block is validated against `tip` before a
    /// new run is written, so a rejected start leaves no row behind.
    pub fn resume_or_create(&self, request: &RunRequest, tip: u64) -> Result<RunSession> {
        if request.run_id != 0 {
            match self.store.fetch_run(request.run_id)? {
                Some(run) => {
                    if run.last_processed_block > tip {
                        return Err(IndexError::InvalidStartBlock {
                            next_block: run.last_processed_block.saturating_add(1),
                            tip,
                        });
                    }
                    tracing::info!(
                        "[RUN] Resuming run {} at block {} ({} contracts).",
                        run.id,
                        run.last_processed_block.saturating_add(1),
                        run.contracts.len()
                    );
                    let next_block = run.last_processed_block.saturating_add(1);
                    return Ok(RunSession {
                        run,
                        next_block,
                        resumed: true,
                    });
                }
                None => tracing::warn!(
                    "[RUN] Run {} not found; creating a new run from block {}.",
                    request.run_id,
                    request.start_block
                ),
            }
        }

        if request.start_block > tip {
            return Err(IndexError::InvalidStartBlock {
                next_block: request.start_block,
                tip,
            });
        }

        let id = self.store.create_run(
            request.start_block,
            request.start_block,
            &request.contracts,
        )?;
        tracing::info!(
            "[RUN] Created run {} from block {} ({} contracts).",
            id,
            request.start_block,
            request.contracts.len()
        );
        Ok(RunSession {
            run: Run {
                id,
                start_block: request.start_block,
                last_processed_block: request.start_block,
                contracts: request.contracts.clone(),
            },
            next_block: request.start_block,
            resumed: false,
        })
    }

    /// Records `block` as fully processed for `run_id`.
    pub fn advance(&self, run_id: i64, block: u64) -> Result<()> {
        if self.store.update_run(run_id, block)? == 0 {
            return Err(IndexError::RunNotFound(run_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryRuns {
        runs: Mutex<BTreeMap<i64, Run>>,
        fail_fetch: bool,
    }

    impl RunStore for MemoryRuns {
        fn create_run(
            &self,
            start_block: u64,
            last_block: u64,
            contracts: &[Address],
        ) -> std::result::Result<i64, StoreError> {
            let mut runs = self.runs.lock().unwrap();
            let id = runs.keys().next_back().copied().unwrap_or(0) + 1;
            runs.insert(
                id,
                Run {
                    id,
                    start_block,
                    last_processed_block: last_block,
                    contracts: contracts.to_vec(),
                },
            );
            Ok(id)
        }

        fn update_run(&self, id: i64, last_block: u64) -> std::result::Result<usize, StoreError> {
            let mut runs = self.runs.lock().unwrap();
            Ok(match runs.get_mut(&id) {
                Some(run) => {
                    run.last_processed_block = last_block;
                    1
                }
                None => 0,
            })
        }

        fn fetch_run(&self, id: i64) -> std::result::Result<Option<Run>, StoreError> {
            if self.fail_fetch {
                return Err(StoreError::Sqlite {
                    context: "fetch_run".to_string(),
                    reason: "disk I/O error".to_string(),
                });
            }
            Ok(self.runs.lock().unwrap().get(&id).cloned())
        }
    }

    fn request(run_id: i64, start_block: u64) -> RunRequest {
        RunRequest {
            run_id,
            start_block,
            contracts: vec![Address::from([0x11; 20])],
        }
    }

    #[test]
    fn test_fresh_run_starts_at_start_block() {
        let tracker = RunTracker::new(Arc::new(MemoryRuns::default()));
        let session = tracker.resume_or_create(&request(0, 100), 100).unwrap();
        assert!(!session.resumed);
        assert_eq!(session.next_block, 100);
        assert_eq!(session.run.last_processed_block, 100);
        assert_eq!(session.run.id, 1);
    }

    #[test]
    fn test_resume_ignores_requested_start_and_contracts() {
        let store = Arc::new(MemoryRuns::default());
        let other = Address::from([0x22; 20]);
        let id = store.create_run(10, 50, &[other]).unwrap();

        let tracker = RunTracker::new(store);
        let session = tracker.resume_or_create(&request(id, 3), 80).unwrap();
        assert!(session.resumed);
        assert_eq!(session.next_block, 51);
        assert_eq!(session.run.contracts, vec![other]);
        assert_eq!(session.run.start_block, 10);
    }

    #[test]
    fn test_missing_run_falls_back_to_create() {
        let store = Arc::new(MemoryRuns::default());
        let tracker = RunTracker::new(Arc::clone(&store));
        let session = tracker.resume_or_create(&request(42, 7), 9).unwrap();
        assert!(!session.resumed);
        assert_eq!(session.next_block, 7);
        assert!(store.fetch_run(session.run.id).unwrap().is_some());
    }

    #[test]
    fn test_store_failure_on_resume_is_fatal() {
        let store = Arc::new(MemoryRuns {
            fail_fetch: true,
            ..MemoryRuns::default()
        });
        let tracker = RunTracker::new(Arc::clone(&store));
        assert!(matches!(
            tracker.resume_or_create(&request(1, 0), 10),
            Err(IndexError::Store(_))
        ));
        assert!(store.runs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_start_beyond_tip_creates_nothing() {
        let store = Arc::new(MemoryRuns::default());
        let tracker = RunTracker::new(Arc::clone(&store));
        let err = tracker.resume_or_create(&request(0, 101), 100).unwrap_err();
        assert!(matches!(
            err,
            IndexError::InvalidStartBlock {
                next_block: 101,
                tip: 100
            }
        ));
        assert!(store.runs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_resumed_run_ahead_of_tip_is_rejected() {
        let store = Arc::new(MemoryRuns::default());
        let id = store.create_run(0, 60, &[Address::ZERO]).unwrap();
        let tracker = RunTracker::new(store);
        assert!(matches!(
            tracker.resume_or_create(&request(id, 0), 50),
            Err(IndexError::InvalidStartBlock {
                next_block: 61,
                tip: 50
            })
        ));
        assert!(tracker.resume_or_create(&request(id, 0), 60).is_ok());
    }

    #[test]
    fn test_advance_unknown_run_is_run_not_found() {
        let store = Arc::new(MemoryRuns::default());
        let tracker = RunTracker::new(Arc::clone(&store));
        assert!(matches!(tracker.advance(9, 1), Err(IndexError::RunNotFound(9))));

        let session = tracker.resume_or_create(&request(0, 1), 5).unwrap();
        tracker.advance(session.run.id, 2).unwrap();
        let stored = store.fetch_run(session.run.id).unwrap().unwrap();
        assert_eq!(stored.last_processed_block, 2);
    }
}
