//! Persistence for mdsync.
//!
//! - `MarketStore`: backing-store seam with SQLite and in-memory implementations
//! - `BatchWriter`: queue-fed background writer with size/time-triggered flushes
//! - `CheckpointStore`: JSON Lines checkpoints for resumable runs
//! - `RunLock`: prevents two runs of the same kind from overlapping

pub mod batch_writer;
pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod run_lock;
pub mod sqlite;
pub mod store;

pub use batch_writer::{
    BatchRecord, BatchSink, BatchWriter, BatchWriterConfig, DividendSink, FlushReport, PriceSink,
};
pub use checkpoint::{Checkpoint, CheckpointKind, CheckpointStore};
pub use error::{PersistenceError, PersistenceResult};
pub use memory::MemoryStore;
pub use run_lock::RunLock;
pub use sqlite::SqliteStore;
pub use store::{ExclusionSource, MarketStore};
