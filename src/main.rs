use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use logcollector::collector::{Collector, CollectorOptions};
use logcollector::config::{CollectorConfig, SinkConfig};
use logcollector::error::ConfigError;
use logcollector::pipeline::{Pipeline, RoutingTable};
use logcollector::server;
use logcollector::sink::{Sink, StdoutSink};

#[derive(Debug, Parser)]
#[command(version, about = "Accepts tagged log records over HTTP and batches them into sinks")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the listen address from the configuration
    #[arg(short, long)]
    listen: Option<String>,
}

fn load_config(path: &Path) -> Result<CollectorConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => CollectorConfig::from_yaml(&contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No {} found, using defaults", path.display());
            Ok(CollectorConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

async fn build_sinks(sink_configs: &[SinkConfig]) -> Result<Vec<Arc<dyn Sink>>, ConfigError> {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
    for cfg in sink_configs {
        match cfg {
            SinkConfig::Stdout {} => {
                sinks.push(Arc::new(StdoutSink));
            }
            #[cfg(feature = "elasticsearch")]
            SinkConfig::ElasticSearch(es_cfg) => {
                use logcollector::sink::elasticsearch::ElasticSearchSink;
                let es_sink = ElasticSearchSink::from_config(es_cfg.to_owned())?;
                info!("Elasticsearch sink configured for {}", es_cfg.url);
                sinks.push(Arc::new(es_sink));
            }
            #[cfg(feature = "postgres")]
            SinkConfig::Postgres(pg_cfg) => {
                use logcollector::sink::postgres::PostgresSink;
                let pg_sink = PostgresSink::from_config(pg_cfg.to_owned()).await?;
                info!("Postgres sink configured for table '{}'", pg_cfg.table_name);
                sinks.push(Arc::new(pg_sink));
            }
            #[cfg(feature = "dashboard")]
            SinkConfig::Dashboard(dashboard_cfg) => {
                use logcollector::sink::dashboard::{DashboardSink, start_dashboard_server};
                let (tx, _rx) = tokio::sync::broadcast::channel(100);
                let port = dashboard_cfg.port;
                let server_tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = start_dashboard_server(port, server_tx).await {
                        error!("Dashboard server error: {}", e);
                    }
                });
                info!("Dashboard sink configured on port {}", port);
                sinks.push(Arc::new(DashboardSink::new(tx, dashboard_cfg.level_field.clone())));
            }
        }
    }
    Ok(sinks)
}

async fn build_routes(config: &CollectorConfig) -> Result<RoutingTable, ConfigError> {
    let mut routes = RoutingTable::default();
    for pipeline_cfg in &config.pipelines {
        let mut builder = Pipeline::builder(pipeline_cfg.pattern()?);
        for filter in &pipeline_cfg.filters {
            builder = builder.filter_arc(filter.build());
        }
        for sink in build_sinks(&pipeline_cfg.sinks).await? {
            builder = builder.output_arc(sink);
        }
        let pipeline = builder.build();
        info!("Pipeline {:?} registered", pipeline);
        routes.push(pipeline);
    }
    Ok(routes)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

async fn run(args: Args) -> Result<(), ConfigError> {
    let mut config = load_config(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    info!(
        "Starting collector: {} pipelines, {} workers, flush every {}s (max count {:?})",
        config.pipelines.len(),
        config.worker_count,
        config.flush_interval_secs,
        config.flush_max_count,
    );

    let options = CollectorOptions {
        routes: build_routes(&config).await?,
        codecs: config.codecs(),
        decompressors: config.decompressors(),
        worker_count: config.worker_count,
        scheduler: config.scheduler_settings(),
    };

    let scheduler_shutdown = CancellationToken::new();
    let (collector, scheduler) = Collector::start(options, scheduler_shutdown.clone())?;

    let app = server::router(collector, &config.base_path);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(
        "Listening on http://{}{}",
        config.listen_addr, config.base_path
    );

    // stop accepting requests before the final drain
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("HTTP server error: {}", e);
    }

    scheduler_shutdown.cancel();
    if let Err(e) = scheduler.await {
        error!("Scheduler terminated abnormally: {}", e);
    }

    info!("Done.");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
