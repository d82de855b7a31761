use std::collections::HashMap;

use async_trait::async_trait;
use axum::{
    Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::{Html, IntoResponse},
    routing::get,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::log_entry::LogEntry;
use crate::sink::{Sink, SinkError};
use crate::tag::Tag;

fn default_level_field() -> String {
    "level".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub port: u16,
    /// Entry field whose string values are counted per flush.
    #[serde(default = "default_level_field")]
    pub level_field: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlushEvent {
    pub timestamp: DateTime<Utc>,
    pub tag: String,
    pub total_count: usize,
    pub by_level: HashMap<String, usize>,
}

/// Publishes a summary of every flushed chunk to connected browsers.
pub struct DashboardSink {
    tx: broadcast::Sender<FlushEvent>,
    level_field: String,
}

impl DashboardSink {
    pub fn new(tx: broadcast::Sender<FlushEvent>, level_field: impl Into<String>) -> Self {
        Self {
            tx,
            level_field: level_field.into(),
        }
    }

    pub fn summarize(&self, tag: &Tag, batch: &[LogEntry]) -> FlushEvent {
        let mut by_level: HashMap<String, usize> = HashMap::new();
        for entry in batch {
            if let Some(level) = entry.get(&self.level_field).and_then(|v| v.as_str()) {
                *by_level.entry(level.to_uppercase()).or_default() += 1;
            }
        }

        FlushEvent {
            timestamp: Utc::now(),
            tag: tag.to_string(),
            total_count: batch.len(),
            by_level,
        }
    }
}

#[async_trait]
impl Sink for DashboardSink {
    async fn write(&self, tag: &Tag, batch: &[LogEntry]) -> Result<(), SinkError> {
        // a send error only means no client is connected
        let _ = self.tx.send(self.summarize(tag, batch));
        Ok(())
    }

    fn name(&self) -> &str {
        "dashboard"
    }
}

pub async fn start_dashboard_server(
    port: u16,
    tx: broadcast::Sender<FlushEvent>,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .with_state(tx);

    let addr = format!("0.0.0.0:{port}");
    info!("Dashboard server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

async fn index_handler() -> impl IntoResponse {
    Html(DASHBOARD_HTML)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(tx): State<broadcast::Sender<FlushEvent>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, tx))
}

async fn handle_ws(socket: WebSocket, tx: broadcast::Sender<FlushEvent>) {
    let mut rx = tx.subscribe();
    let (mut sender, mut _receiver) = socket.split();

    while let Ok(event) = rx.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(j) => j,
            Err(_) => continue,
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            break; // client disconnected
        }
    }
}

const DASHBOARD_HTML: &str = r##"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<title>logcollector</title>
<style>
  body { font-family: monospace; margin: 2em; }
  table { border-collapse: collapse; }
  td, th { padding: 2px 12px; text-align: left; }
</style>
</head>
<body>
<p id="conn">offline</p>
<p>chunks <b id="chunks">0</b>, entries <b id="entries">0</b>, tags <b id="tags">0</b></p>
<table>
  <thead><tr><th>flushed</th><th>tag</th><th>entries</th><th>levels</th></tr></thead>
  <tbody id="rows"></tbody>
</table>
<script>
  const seenTags = new Set();
  const totals = { chunks: 0, entries: 0 };

  function render(ev) {
    totals.chunks += 1;
    totals.entries += ev.total_count;
    seenTags.add(ev.tag);
    document.getElementById('chunks').textContent = totals.chunks;
    document.getElementById('entries').textContent = totals.entries;
    document.getElementById('tags').textContent = seenTags.size;

    const row = document.createElement('tr');
    const levels = Object.keys(ev.by_level).sort()
      .map((level) => level + '=' + ev.by_level[level]).join(' ');
    for (const text of [new Date(ev.timestamp).toISOString(), ev.tag, ev.total_count, levels]) {
      const cell = document.createElement('td');
      cell.textContent = text;
      row.appendChild(cell);
    }
    const rows = document.getElementById('rows');
    rows.prepend(row);
    if (rows.children.length > 100) rows.lastChild.remove();
  }

  function connect() {
    const socket = new WebSocket('ws://' + location.host + '/ws');
    socket.onopen = () => { document.getElementById('conn').textContent = 'online'; };
    socket.onclose = () => {
      document.getElementById('conn').textContent = 'offline';
      setTimeout(connect, 2000);
    };
    socket.onmessage = (msg) => render(JSON.parse(msg.data));
  }

  connect();
</script>
</body>
</html>
"##;
