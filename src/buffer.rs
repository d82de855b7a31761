use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::log_entry::LogEntry;
use crate::sink::Outputs;
use crate::tag::Tag;

/// When a buffer hands out its oldest chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Upper bound on how long a record may wait, measured as time
    /// accumulated across polls.
    pub interval: Duration,
    /// Close the open chunk once it holds this many records.
    pub max_count: Option<NonZeroUsize>,
}

impl FlushPolicy {
    pub fn new(interval: Duration, max_count: Option<NonZeroUsize>) -> Self {
        Self {
            interval,
            max_count,
        }
    }
}

/// A batch of records for a single tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    entries: Vec<LogEntry>,
}

impl Chunk {
    fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-tag accumulator.
///
/// Records are appended to the open chunk at the back of the queue. Every
/// chunk in front of it is closed and ready to flush. A chunk is handed out
/// either when enough time has accumulated since the last time-based flush,
/// or when the open chunk rolled over on `max_count`. A count-based flush
/// does not reset the interval clock.
pub struct Buffer {
    tag: Tag,
    outputs: Outputs,
    policy: FlushPolicy,
    chunks: VecDeque<Chunk>,
    elapsed: Duration,
    last_sample: Instant,
}

impl Buffer {
    pub fn new(tag: Tag, outputs: Outputs, policy: FlushPolicy, now: Instant) -> Self {
        let mut chunks = VecDeque::with_capacity(1);
        chunks.push_back(Chunk::default());
        Self {
            tag,
            outputs,
            policy,
            chunks,
            elapsed: Duration::ZERO,
            last_sample: now,
        }
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    pub fn add(&mut self, entry: LogEntry) {
        let needs_new_chunk = match self.chunks.back() {
            None => true,
            Some(open) => self
                .policy
                .max_count
                .is_some_and(|max| open.len() >= max.get()),
        };
        if needs_new_chunk {
            self.chunks.push_back(Chunk::default());
        }
        if let Some(open) = self.chunks.back_mut() {
            open.push(entry);
        }
    }

    /// Sample the clock and return the oldest chunk if either flush condition
    /// holds.
    pub fn poll_ready(&mut self, now: Instant) -> Option<Chunk> {
        // A clock that went backwards contributes nothing.
        self.elapsed += now.saturating_duration_since(self.last_sample);
        self.last_sample = now;

        if self.elapsed >= self.policy.interval {
            self.elapsed = Duration::ZERO;
            return self.chunks.pop_front();
        }
        if self.chunks.len() > 1 {
            return self.chunks.pop_front();
        }
        None
    }

    /// Dequeue the oldest chunk regardless of the flush policy.
    pub fn force_poll(&mut self) -> Option<Chunk> {
        self.chunks.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of records currently held, across all chunks.
    pub fn pending(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    #[cfg(test)]
    fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
