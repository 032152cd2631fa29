//! Cistern: persists context notifications into PostgreSQL.
//!
//! # Usage
//!
//! ```bash
//! cistern --pg-host db.local --attr-persistence row --input events.jsonl
//! ```
//!
//! Environment variables can also be used:
//! - `CISTERN_PG_HOST`, `CISTERN_PG_PORT`: PostgreSQL server
//! - `CISTERN_PG_USERNAME`, `CISTERN_PG_PASSWORD`: credentials
//! - `CISTERN_ATTR_PERSISTENCE`: `row` or `column`
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context;
use cistern::cache::ConnectionCache;
use cistern::config::Config;
use cistern::gateway::StorageGateway;
use cistern::ingest::run_ingest;
use cistern::observability::metrics::init_metrics_with_endpoint;
use cistern::observability::tracing::init_tracing;
use cistern::router::BatchRouter;
use cistern::store::{MemoryStore, PostgresConnector, StoreConnector};
use cistern::worker::SinkWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::watch;

/// Time left to blocking tasks once the sink has stopped.
///
/// Tokio reads stdin on a blocking thread that only returns with the next
/// line, so an idle producer would otherwise hold the process open.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let store = if config.dry_run {
        "in-process (dry run)".to_string()
    } else {
        config.postgres().target("")
    };
    let input = config
        .input
        .as_ref()
        .map_or_else(|| "stdin".to_string(), |p| p.display().to_string());
    eprintln!(
        r#"
   ___ _     _
  / __(_)___| |_ ___ _ _ _ _
 | (__| (_-<|  _/ -_) '_| ' \
  \___|_/__/ \__\___|_| |_||_|

  Cistern v{}

  Configuration:
    Store:       {}
    Layout:      {}
    Inserts:     {}
    Grouping:    {}
    Input:       {}
    Log Level:   {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        store,
        config.attr_persistence,
        config.insert_style,
        config.enable_grouping,
        input,
        config.log_level
    );
}

async fn open_input(config: &Config) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    Ok(match &config.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    })
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {
                        tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating shutdown...");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                if ctrl_c.await.is_ok() {
                    tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if ctrl_c.await.is_ok() {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let result = runtime.block_on(run(config));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config.log_level);
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    print_banner(&config);
    tracing::debug!(?config, "Configuration loaded");

    let connector: Arc<dyn StoreConnector> = if config.dry_run {
        Arc::new(MemoryStore::permissive())
    } else {
        Arc::new(PostgresConnector::new(config.postgres()))
    };
    let cache = ConnectionCache::new(connector, config.connection_cache_size);
    let router = BatchRouter::new(StorageGateway::new(cache), config.router());
    let worker = SinkWorker::spawn(router, config.channel_size)?;
    let handle = worker.handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let input = open_input(&config).await?;
    let stats = run_ingest(input, &handle, &config.ingest(), shutdown_rx).await?;
    tracing::info!(
        records = stats.records,
        rows = stats.rows,
        dropped = stats.batches_dropped,
        "Input drained"
    );

    tracing::info!("Shutting down sink worker");
    handle.shutdown().await?;
    drop(handle);
    tokio::task::spawn_blocking(move || worker.join()).await??;

    tracing::info!("Cistern shutdown complete");
    Ok(())
}
