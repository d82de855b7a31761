use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{self, Codec, Decompressor};
use crate::error::{ConfigError, IngestError};
use crate::log_entry::LogEntry;
use crate::pipeline::RoutingTable;
use crate::scheduler::{QueuedRecord, Scheduler, SchedulerSettings};
use crate::tag::Tag;
use crate::worker::WorkerPool;

/// Everything the collector core needs to start.
pub struct CollectorOptions {
    pub routes: RoutingTable,
    pub codecs: Vec<Arc<dyn Codec>>,
    pub decompressors: Vec<Arc<dyn Decompressor>>,
    pub worker_count: usize,
    pub scheduler: SchedulerSettings,
}

impl CollectorOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "worker_count must be greater than zero".into(),
            ));
        }
        if self.scheduler.max_records_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "request_max_count_at_once must be greater than zero".into(),
            ));
        }
        if self.scheduler.flush.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flush_interval_secs must be greater than zero".into(),
            ));
        }
        if self.codecs.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one codec is required".into(),
            ));
        }
        if self.routes.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one pipeline is required".into(),
            ));
        }
        Ok(())
    }
}

/// Request-side handle: decodes, routes and filters records, then queues
/// them for the scheduler. Cheap to clone and safe to share across request
/// handlers.
#[derive(Clone)]
pub struct Collector {
    routes: Arc<RoutingTable>,
    codecs: Arc<[Arc<dyn Codec>]>,
    decompressors: Arc<[Arc<dyn Decompressor>]>,
    inbound: mpsc::UnboundedSender<QueuedRecord>,
}

impl Collector {
    /// Validate `options`, spawn the worker pool and the scheduler, and
    /// return the request handle plus the scheduler task.
    ///
    /// Cancelling `shutdown` makes the scheduler flush every buffer and
    /// wait for the workers; the returned handle completes after that.
    pub fn start(
        options: CollectorOptions,
        shutdown: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), ConfigError> {
        options.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(options.worker_count);
        let scheduler = Scheduler::new(rx, pool, options.scheduler, shutdown);
        let handle = tokio::spawn(scheduler.run());

        info!(
            "Collector started with {} pipelines, {} codecs, {} decompressors",
            options.routes.len(),
            options.codecs.len(),
            options.decompressors.len(),
        );

        let collector = Self {
            routes: Arc::new(options.routes),
            codecs: options.codecs.into(),
            decompressors: options.decompressors.into(),
            inbound: tx,
        };
        Ok((collector, handle))
    }

    pub fn codec_for(&self, content_type: &str) -> Option<&Arc<dyn Codec>> {
        let wanted = codec::media_type(content_type);
        self.codecs
            .iter()
            .find(|c| c.content_type().eq_ignore_ascii_case(wanted))
    }

    /// First decompressor matching any token of a `Content-Encoding` value.
    /// Unknown tokens are skipped.
    pub fn decompressor_for(&self, content_encoding: &str) -> Option<&Arc<dyn Decompressor>> {
        content_encoding
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .find_map(|token| {
                self.decompressors
                    .iter()
                    .find(|d| d.encoding().eq_ignore_ascii_case(token))
            })
    }

    /// Turn a raw request body into a log entry.
    pub fn decode(
        &self,
        content_type: Option<&str>,
        content_encoding: Option<&str>,
        body: &[u8],
    ) -> Result<LogEntry, IngestError> {
        let content_type = content_type.unwrap_or_default();
        let codec = self
            .codec_for(content_type)
            .ok_or_else(|| IngestError::UnsupportedMediaType(content_type.to_string()))?;

        if body.is_empty() {
            return Err(IngestError::EmptyBody);
        }

        let entry = match content_encoding.and_then(|e| self.decompressor_for(e)) {
            Some(decompressor) => codec.decode(&decompressor.decompress(body)?)?,
            None => codec.decode(body)?,
        };
        Ok(entry)
    }

    /// Route and filter one record, then queue it for batching.
    pub fn submit(&self, tag: Tag, entry: LogEntry) -> Result<(), IngestError> {
        let pipeline = self
            .routes
            .route(&tag)
            .ok_or_else(|| IngestError::NoMatchingPipeline(tag.to_string()))?;

        let (mut tag, mut entry) = (tag, entry);
        if !pipeline.apply_filters(&mut tag, &mut entry) {
            debug!("Forbid tag {}", tag);
            return Err(IngestError::FilterRejected(tag.to_string()));
        }

        let record = QueuedRecord {
            tag,
            entry,
            outputs: pipeline.outputs().clone(),
        };
        self.inbound.send(record).map_err(|_| {
            warn!("Record received after shutdown; rejecting");
            IngestError::Internal("collector is shutting down".into())
        })
    }

    /// Full request path: parse the tag, decode the body, route, filter and
    /// queue.
    pub fn ingest(
        &self,
        raw_tag: &str,
        content_type: Option<&str>,
        content_encoding: Option<&str>,
        body: &[u8],
    ) -> Result<(), IngestError> {
        debug!("Add tag {}", raw_tag);
        let tag = Tag::parse(raw_tag)?;
        let entry = self.decode(content_type, content_encoding, body)?;
        self.submit(tag, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FlushPolicy;
    use crate::codec::{GzipDecompressor, JsonCodec, MessagePackCodec};
    use crate::pipeline::Pipeline;
    use crate::sink::MemorySink;
    use crate::tag::Pattern;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    fn options(routes: RoutingTable) -> CollectorOptions {
        CollectorOptions {
            routes,
            codecs: vec![
                Arc::new(JsonCodec) as Arc<dyn Codec>,
                Arc::new(MessagePackCodec),
            ],
            decompressors: vec![Arc::new(GzipDecompressor) as Arc<dyn Decompressor>],
            worker_count: 2,
            scheduler: SchedulerSettings {
                max_records_per_tick: 2000,
                tick_interval: Duration::from_millis(5),
                flush: FlushPolicy::new(Duration::from_secs(300), NonZeroUsize::new(2)),
            },
        }
    }

    fn metrics_routes(sink: Arc<MemorySink>) -> RoutingTable {
        RoutingTable::new(vec![
            Pipeline::builder(Pattern::parse("metrics.*").unwrap())
                .filter(|_: &mut Tag, entry: &mut LogEntry| !entry.contains("drop"))
                .output_arc(sink)
                .build(),
        ])
    }

    const JSON: Option<&str> = Some("application/json");

    #[tokio::test]
    async fn test_request_outcomes() {
        let sink = Arc::new(MemorySink::new());
        let token = CancellationToken::new();
        let (collector, handle) = Collector::start(options(metrics_routes(sink)), token.clone()).unwrap();

        assert!(collector.ingest("metrics.cpu", JSON, None, br#"{"v":1}"#).is_ok());
        assert!(matches!(
            collector.ingest("logs.app", JSON, None, br#"{"v":1}"#),
            Err(IngestError::NoMatchingPipeline(_))
        ));
        assert!(matches!(
            collector.ingest("metrics.cpu", JSON, None, br#"{"drop":true}"#),
            Err(IngestError::FilterRejected(_))
        ));
        assert!(matches!(
            collector.ingest("metrics.cpu", Some("text/plain"), None, b"v=1"),
            Err(IngestError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            collector.ingest("metrics.cpu", None, None, b"{}"),
            Err(IngestError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            collector.ingest("metrics.cpu", JSON, None, b""),
            Err(IngestError::EmptyBody)
        ));
        assert!(matches!(
            collector.ingest("metrics.cpu", JSON, None, b"{oops"),
            Err(IngestError::Decode(_))
        ));
        assert!(matches!(
            collector.ingest("...", JSON, None, b"{}"),
            Err(IngestError::InvalidTag(_))
        ));

        token.cancel();
        handle.await.unwrap();

        assert!(matches!(
            collector.ingest("metrics.cpu", JSON, None, br#"{"v":2}"#),
            Err(IngestError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_gzip_body_with_content_type_parameters() {
        let sink = Arc::new(MemorySink::new());
        let token = CancellationToken::new();
        let (collector, handle) =
            Collector::start(options(metrics_routes(sink.clone())), token.clone()).unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"v":42}"#).unwrap();
        let body = encoder.finish().unwrap();

        collector
            .ingest(
                "metrics.disk",
                Some("Application/JSON; charset=utf-8"),
                Some("identity, gzip"),
                &body,
            )
            .unwrap();
        assert!(matches!(
            collector.ingest("metrics.disk", JSON, Some("gzip"), b"not gzip"),
            Err(IngestError::Decompress(_))
        ));

        token.cancel();
        handle.await.unwrap();

        let chunks = sink.chunks_for("metrics.disk");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0][0].get("v").and_then(|v| v.as_i64()), Some(42));
    }

    #[tokio::test]
    async fn test_filter_can_retag_before_queueing() {
        let sink = Arc::new(MemorySink::new());
        let routes = RoutingTable::new(vec![
            Pipeline::builder(Pattern::parse("mongo.**").unwrap())
                .transform(|tag, _| {
                    tag.push("archive").ok();
                })
                .output_arc(sink.clone())
                .build(),
        ]);
        let token = CancellationToken::new();
        let (collector, handle) = Collector::start(options(routes), token.clone()).unwrap();

        collector.ingest("mongo.db", JSON, None, br#"{"a":1}"#).unwrap();
        token.cancel();
        handle.await.unwrap();

        assert_eq!(sink.chunks_for("mongo.db.archive").len(), 1);
        assert!(sink.chunks_for("mongo.db").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_options_are_rejected() {
        let mut opts = options(RoutingTable::default());
        assert!(matches!(
            Collector::start(opts, CancellationToken::new()),
            Err(ConfigError::Invalid(_))
        ));

        opts = options(metrics_routes(Arc::new(MemorySink::new())));
        opts.worker_count = 0;
        assert!(Collector::start(opts, CancellationToken::new()).is_err());

        opts = options(metrics_routes(Arc::new(MemorySink::new())));
        opts.codecs.clear();
        assert!(Collector::start(opts, CancellationToken::new()).is_err());
    }
}
