use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::buffer::{Buffer, Chunk, FlushPolicy};
use crate::log_entry::LogEntry;
use crate::sink::Outputs;
use crate::tag::Tag;
use crate::worker::WorkerPool;

/// A routed, filtered record waiting to be batched.
pub struct QueuedRecord {
    pub tag: Tag,
    pub entry: LogEntry,
    pub outputs: Outputs,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Upper bound on records moved from the inbound queue per tick.
    pub max_records_per_tick: usize,
    pub tick_interval: Duration,
    pub flush: FlushPolicy,
}

/// Sole owner of the per-tag buffers.
///
/// Each tick moves a bounded number of inbound records into their buffers,
/// polls every buffer once, and dispatches ready chunks to the worker pool.
/// Once `shutdown` is cancelled it drains everything and stops the pool.
pub struct Scheduler {
    inbound: mpsc::UnboundedReceiver<QueuedRecord>,
    buffers: HashMap<String, Buffer>,
    pool: WorkerPool,
    settings: SchedulerSettings,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        inbound: mpsc::UnboundedReceiver<QueuedRecord>,
        pool: WorkerPool,
        settings: SchedulerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inbound,
            buffers: HashMap::new(),
            pool,
            settings,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            "Scheduler started: {} workers, flush interval {:?}, max count {:?}",
            self.pool.len(),
            self.settings.flush.interval,
            self.settings.flush.max_count,
        );

        loop {
            self.tick(Instant::now());
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.tick_interval) => {}
            }
        }

        self.drain().await;
    }

    /// One scheduling pass. Returns the number of chunks dispatched.
    pub fn tick(&mut self, now: Instant) -> usize {
        self.intake(Some(self.settings.max_records_per_tick), now);

        let mut dispatched = 0;
        let mut drained = Vec::new();
        for (key, buffer) in self.buffers.iter_mut() {
            if let Some(chunk) = buffer.poll_ready(now) {
                if dispatch(&mut self.pool, buffer, chunk) {
                    dispatched += 1;
                }
                if buffer.is_empty() {
                    drained.push(key.clone());
                }
            }
        }

        for key in drained {
            self.buffers.remove(&key);
        }
        dispatched
    }

    /// Move up to `limit` records from the inbound queue into buffers.
    fn intake(&mut self, limit: Option<usize>, now: Instant) -> usize {
        let mut taken = 0;
        while limit.is_none_or(|limit| taken < limit) {
            let Ok(record) = self.inbound.try_recv() else {
                break;
            };
            let flush = self.settings.flush;
            let QueuedRecord {
                tag,
                entry,
                outputs,
            } = record;
            self.buffers
                .entry(tag.key())
                .or_insert_with(|| Buffer::new(tag, outputs, flush, now))
                .add(entry);
            taken += 1;
        }
        taken
    }

    async fn drain(mut self) {
        info!("Shutting down scheduler, fetching remaining records");
        // New submissions fail from here on instead of being lost.
        self.inbound.close();
        let fetched = self.intake(None, Instant::now());
        debug!("Fetched {} remaining records", fetched);

        info!("Flushing {} remaining buffers", self.buffers.len());
        let mut dispatched = 0;
        for buffer in self.buffers.values_mut() {
            while let Some(chunk) = buffer.force_poll() {
                if dispatch(&mut self.pool, buffer, chunk) {
                    dispatched += 1;
                }
            }
        }
        self.buffers.clear();
        debug!("Dispatched {} final chunks", dispatched);

        self.pool.stop().await;
        info!("Scheduler stopped");
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

/// Queue a task that writes `chunk` to every output of `buffer`, in order.
/// An output failure is logged and the remaining outputs still run.
fn dispatch(pool: &mut WorkerPool, buffer: &Buffer, chunk: Chunk) -> bool {
    if chunk.is_empty() {
        return false;
    }
    let tag = buffer.tag().clone();
    let outputs = buffer.outputs().clone();
    let worker = pool.dispatch(Box::pin(async move {
        for output in outputs.iter() {
            if let Err(e) = output.write(&tag, chunk.entries()).await {
                error!("Output '{}' failed for tag {}: {}", output.name(), tag, e);
            }
        }
    }));
    debug!("Dispatched chunk for {} to worker {}", buffer.tag(), worker);
    true
}
