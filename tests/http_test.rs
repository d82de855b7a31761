use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use logcollector::buffer::FlushPolicy;
use logcollector::codec::{Codec, Decompressor, GzipDecompressor, JsonCodec, MessagePackCodec};
use logcollector::collector::{Collector, CollectorOptions};
use logcollector::log_entry::LogEntry;
use logcollector::pipeline::{Pipeline, RoutingTable};
use logcollector::scheduler::SchedulerSettings;
use logcollector::server;
use logcollector::sink::MemorySink;
use logcollector::tag::{Pattern, Tag};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TestApp {
    router: Router,
    sink: Arc<MemorySink>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

fn app(base_path: &str) -> TestApp {
    let sink = Arc::new(MemorySink::new());
    let routes = RoutingTable::new(vec![
        Pipeline::builder(Pattern::parse("metrics.*").unwrap())
            .filter(|_: &mut Tag, entry: &mut LogEntry| !entry.contains("secret"))
            .output_arc(sink.clone())
            .build(),
    ]);
    let options = CollectorOptions {
        routes,
        codecs: vec![Arc::new(JsonCodec) as Arc<dyn Codec>, Arc::new(MessagePackCodec)],
        decompressors: vec![Arc::new(GzipDecompressor) as Arc<dyn Decompressor>],
        worker_count: 1,
        scheduler: SchedulerSettings {
            max_records_per_tick: 100,
            tick_interval: Duration::from_millis(5),
            flush: FlushPolicy::new(Duration::from_secs(300), None),
        },
    };
    let token = CancellationToken::new();
    let (collector, handle) = Collector::start(options, token.clone()).unwrap();
    TestApp {
        router: server::router(collector, base_path),
        sink,
        token,
        handle,
    }
}

fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", content_type)
        .body(body.into())
        .unwrap()
}

async fn status(router: &Router, request: Request<Body>) -> StatusCode {
    router.clone().oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn test_ingest_status_codes() {
    let app = app("/");
    let json = "application/json";

    assert_eq!(status(&app.router, post("/metrics.cpu", json, r#"{"v":1}"#)).await, StatusCode::OK);
    assert_eq!(status(&app.router, post("/metrics.cpu/", json, r#"{"v":2}"#)).await, StatusCode::OK);
    assert_eq!(status(&app.router, post("/logs.app", json, r#"{"v":1}"#)).await, StatusCode::NOT_FOUND);
    assert_eq!(
        status(&app.router, post("/metrics.cpu", json, r#"{"secret":"x"}"#)).await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        status(&app.router, post("/metrics.cpu", "text/plain", "v=1")).await,
        StatusCode::EXPECTATION_FAILED
    );
    assert_eq!(status(&app.router, post("/metrics.cpu", json, "")).await, StatusCode::BAD_REQUEST);
    assert_eq!(status(&app.router, post("/metrics.cpu", json, "{broken")).await, StatusCode::BAD_REQUEST);
    assert_eq!(status(&app.router, post("/..", json, r#"{"v":1}"#)).await, StatusCode::BAD_REQUEST);

    app.token.cancel();
    app.handle.await.unwrap();
    let chunks = app.sink.chunks_for("metrics.cpu");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].len(), 2);
}

#[tokio::test]
async fn test_msgpack_body_under_base_path() {
    let app = app("/logs");
    let body = rmp_serde::to_vec(&serde_json::json!({"v": 7, "host": "a"})).unwrap();

    assert_eq!(
        status(&app.router, post("/logs/metrics.mem", "application/msgpack", body)).await,
        StatusCode::OK
    );
    // trailing path segments after the tag are ignored
    assert_eq!(
        status(&app.router, post("/logs/metrics.mem/extra", "application/json", r#"{"v":8}"#)).await,
        StatusCode::OK
    );
    assert_eq!(
        status(&app.router, post("/logs/metrics.mem/", "application/json", r#"{"v":10}"#)).await,
        StatusCode::OK
    );
    assert_eq!(
        status(&app.router, post("/metrics.mem", "application/json", r#"{"v":9}"#)).await,
        StatusCode::NOT_FOUND
    );

    app.token.cancel();
    app.handle.await.unwrap();

    let chunks = app.sink.chunks_for("metrics.mem");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].len(), 3);
    assert_eq!(chunks[0][0].get("host").and_then(|v| v.as_str()), Some("a"));
}

#[tokio::test]
async fn test_submission_after_shutdown_is_internal_error() {
    let app = app("/");
    app.token.cancel();
    app.handle.await.unwrap();

    let response = app
        .router
        .clone()
        .oneshot(post("/metrics.cpu", "application/json", r#"{"v":1}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"collector is shutting down");
}
