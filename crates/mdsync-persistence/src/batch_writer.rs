//! Queue-fed background writer.
//!
//! Producers enqueue records on a bounded channel; one task per writer drains
//! it and hands full batches to a [`BatchSink`]. A batch is written when the
//! buffer reaches `batch_size`, when the optional flush interval elapses, on an
//! explicit [`BatchWriter::flush`] and on [`BatchWriter::stop`]. Sink writes
//! are blocking and run on the blocking pool.

use crate::error::{PersistenceError, PersistenceResult};
use crate::store::MarketStore;
use mdsync_core::{DividendEvent, PricePoint, MAX_ERROR_SAMPLES};
use mdsync_telemetry::Metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A record the writer can attribute to a symbol.
pub trait BatchRecord: Send + Sync + 'static {
    fn symbol(&self) -> &str;
}

impl BatchRecord for PricePoint {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl BatchRecord for DividendEvent {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}

/// Destination of flushed batches.
pub trait BatchSink<T>: Send + Sync + 'static {
    /// Label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Persist one batch. Returns rows written.
    fn write_batch(&self, records: &[T]) -> PersistenceResult<usize>;
}

pub struct PriceSink {
    store: Arc<dyn MarketStore>,
}

impl PriceSink {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }
}

impl BatchSink<PricePoint> for PriceSink {
    fn name(&self) -> &'static str {
        "prices"
    }

    fn write_batch(&self, records: &[PricePoint]) -> PersistenceResult<usize> {
        self.store.upsert_prices(records)
    }
}

pub struct DividendSink {
    store: Arc<dyn MarketStore>,
}

impl DividendSink {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }
}

impl BatchSink<DividendEvent> for DividendSink {
    fn name(&self) -> &'static str {
        "dividends"
    }

    fn write_batch(&self, records: &[DividendEvent]) -> PersistenceResult<usize> {
        self.store.upsert_dividends(records)
    }
}

#[derive(Debug, Clone)]
pub struct BatchWriterConfig {
    /// Buffer size that triggers a flush.
    pub batch_size: usize,
    /// Periodic flush of a partially filled buffer. `None` disables it.
    pub flush_interval: Option<Duration>,
    /// Bound of the producer queue; producers wait when it is full.
    pub queue_capacity: usize,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval: Some(Duration::from_secs(5)),
            queue_capacity: 10_000,
        }
    }
}

/// Counters for flushes performed over some window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub flushes: u64,
    pub records_flushed: u64,
    pub records_failed: u64,
    /// Records lost to failed flushes, per symbol.
    pub failed_symbols: BTreeMap<String, u64>,
    pub errors: Vec<String>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.records_failed == 0
    }

    pub fn merge(&mut self, other: &FlushReport) {
        self.flushes += other.flushes;
        self.records_flushed += other.records_flushed;
        self.records_failed += other.records_failed;
        for (symbol, count) in &other.failed_symbols {
            *self.failed_symbols.entry(symbol.clone()).or_default() += count;
        }
        for err in &other.errors {
            if self.errors.len() < MAX_ERROR_SAMPLES {
                self.errors.push(err.clone());
            }
        }
    }
}

enum Command<T> {
    Record(T),
    Flush(oneshot::Sender<FlushReport>),
}

pub struct BatchWriter<T: BatchRecord> {
    name: &'static str,
    tx: mpsc::Sender<Command<T>>,
    handle: JoinHandle<FlushReport>,
}

impl<T: BatchRecord> BatchWriter<T> {
    /// Start the writer task. Must be called from within a tokio runtime.
    pub fn spawn(sink: Arc<dyn BatchSink<T>>, config: BatchWriterConfig) -> Self {
        let name = sink.name();
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let handle = tokio::spawn(run_writer(rx, sink, config));
        Self { name, tx, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue one record, waiting while the queue is full.
    pub async fn enqueue(&self, record: T) -> PersistenceResult<()> {
        self.tx
            .send(Command::Record(record))
            .await
            .map_err(|_| PersistenceError::WriterClosed)
    }

    pub async fn enqueue_all(&self, records: Vec<T>) -> PersistenceResult<()> {
        for record in records {
            self.enqueue(record).await?;
        }
        Ok(())
    }

    /// Write everything queued so far.
    ///
    /// Returns the flushes performed since the previous `flush` call,
    /// including size- and interval-triggered ones.
    pub async fn flush(&self) -> PersistenceResult<FlushReport> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack_tx))
            .await
            .map_err(|_| PersistenceError::WriterClosed)?;
        ack_rx.await.map_err(|_| PersistenceError::WriterClosed)
    }

    /// Close the queue, drain it, write the remainder and return the
    /// report covering the writer's whole lifetime.
    pub async fn stop(self) -> PersistenceResult<FlushReport> {
        let Self { name, tx, handle } = self;
        drop(tx);
        let report = handle
            .await
            .map_err(|e| PersistenceError::WriterTask(e.to_string()))?;
        info!(
            writer = name,
            flushes = report.flushes,
            records = report.records_flushed,
            failed = report.records_failed,
            "Batch writer stopped"
        );
        Ok(report)
    }
}

struct WriterState<T: BatchRecord> {
    sink: Arc<dyn BatchSink<T>>,
    buffer: Vec<T>,
    total: FlushReport,
    since_ack: FlushReport,
}

impl<T: BatchRecord> WriterState<T> {
    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        let count = batch.len();
        let mut per_symbol: BTreeMap<String, u64> = BTreeMap::new();
        for record in &batch {
            *per_symbol.entry(record.symbol().to_string()).or_default() += 1;
        }

        let sink = Arc::clone(&self.sink);
        let name = sink.name();
        let result = tokio::task::spawn_blocking(move || sink.write_batch(&batch))
            .await
            .map_err(|e| PersistenceError::WriterTask(e.to_string()))
            .and_then(|r| r);

        let mut delta = FlushReport {
            flushes: 1,
            ..Default::default()
        };
        match result {
            Ok(written) => {
                delta.records_flushed = count as u64;
                Metrics::batch_flush(name, true);
                Metrics::records_persisted(name, written);
                debug!(writer = name, records = count, "Flushed batch");
            }
            Err(e) => {
                delta.records_failed = count as u64;
                delta.failed_symbols = per_symbol;
                delta.errors.push(e.to_string());
                Metrics::batch_flush(name, false);
                warn!(writer = name, records = count, error = %e, "Batch flush failed");
            }
        }
        self.total.merge(&delta);
        self.since_ack.merge(&delta);
    }
}

async fn run_writer<T: BatchRecord>(
    mut rx: mpsc::Receiver<Command<T>>,
    sink: Arc<dyn BatchSink<T>>,
    config: BatchWriterConfig,
) -> FlushReport {
    let batch_size = config.batch_size.max(1);
    let mut ticker = config.flush_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut state = WriterState {
        sink,
        buffer: Vec::with_capacity(batch_size),
        total: FlushReport::default(),
        since_ack: FlushReport::default(),
    };

    loop {
        let command = tokio::select! {
            command = rx.recv() => command,
            _ = next_tick(&mut ticker) => {
                state.flush().await;
                continue;
            }
        };

        match command {
            Some(Command::Record(record)) => {
                state.buffer.push(record);
                if state.buffer.len() >= batch_size {
                    state.flush().await;
                }
            }
            Some(Command::Flush(ack)) => {
                state.flush().await;
                let _ = ack.send(std::mem::take(&mut state.since_ack));
            }
            None => break,
        }
    }

    // Queue closed and drained.
    state.flush().await;
    state.total
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
