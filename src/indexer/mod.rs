//! The indexing core: root-based change detection, trace extraction, run
//! bookkeeping and the block loop that ties them together.

pub mod clock;
pub mod detector;
pub mod engine;
pub mod extractor;
pub mod root_cache;
pub mod run_tracker;

pub use clock::{Clock, ManualClock, TokioClock};
pub use detector::ChangeDetector;
pub use engine::{BlockReport, IndexingLoop, LoopState, Step};
pub use extractor::{BlockTraceCursor, TraceExtractor, TransactionEntries};
pub use root_cache::{CachedRoot, StorageRootCache};
pub use run_tracker::{RunRequest, RunSession, RunTracker};
