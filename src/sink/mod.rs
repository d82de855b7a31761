use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use crate::log_entry::LogEntry;
use crate::tag::Tag;

#[cfg(feature = "dashboard")]
pub mod dashboard;
#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
#[cfg(feature = "postgres")]
pub mod postgres;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// The ordered outputs of one pipeline, shared by every record it routes.
pub type Outputs = Arc<[Arc<dyn Sink>]>;

/// Destination for flushed chunks.
///
/// The same sink may be reachable from many tags, so `write` can be called
/// concurrently from different workers.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, tag: &Tag, batch: &[LogEntry]) -> Result<(), SinkError>;

    fn name(&self) -> &str {
        "sink"
    }
}

/// A simple sink that writes a one-line summary per chunk using the `tracing`
/// crate. Mostly useful for testing and debugging a pipeline layout.
pub struct StdoutSink;

#[async_trait]
impl Sink for StdoutSink {
    async fn write(&self, tag: &Tag, batch: &[LogEntry]) -> Result<(), SinkError> {
        info!("Tag: {}, Count: {}", tag, batch.len());
        for entry in batch {
            info!("{}: {}", tag, serde_json::to_string(entry)?);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Keeps every chunk it receives in memory, in arrival order.
#[derive(Default)]
pub struct MemorySink {
    chunks: Mutex<Vec<(Tag, Vec<LogEntry>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<(Tag, Vec<LogEntry>)> {
        match self.chunks.lock() {
            Ok(chunks) => chunks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Chunks received for `tag`, compared case-insensitively.
    pub fn chunks_for(&self, tag: &str) -> Vec<Vec<LogEntry>> {
        let Ok(key) = Tag::parse(tag).map(|t| t.key()) else {
            return Vec::new();
        };
        self.chunks()
            .into_iter()
            .filter(|(t, _)| t.key() == key)
            .map(|(_, batch)| batch)
            .collect()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&self, tag: &Tag, batch: &[LogEntry]) -> Result<(), SinkError> {
        let mut chunks = self.chunks.lock().map_err(|e| e.to_string())?;
        chunks.push((tag.clone(), batch.to_vec()));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_records_chunks_in_order() {
        let sink = MemorySink::new();
        let cpu = Tag::parse("metrics.CPU").unwrap();
        let mem = Tag::parse("metrics.mem").unwrap();

        let entry: LogEntry = [("v", 1i64)].into_iter().collect();
        sink.write(&cpu, &[entry.clone()]).await.unwrap();
        sink.write(&mem, &[entry.clone(), entry.clone()]).await.unwrap();

        assert_eq!(sink.chunks().len(), 2);
        assert_eq!(sink.chunks_for("metrics.cpu"), vec![vec![entry.clone()]]);
        assert_eq!(sink.chunks_for("metrics.mem")[0].len(), 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_stdout_sink_logs_summary() {
        let tag = Tag::parse("app.web").unwrap();
        let entry: LogEntry = [("msg", "hello")].into_iter().collect();
        StdoutSink.write(&tag, &[entry]).await.unwrap();
        assert!(logs_contain("Tag: app.web, Count: 1"));
    }
}
