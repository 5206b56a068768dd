//! kickoffd - game sign-up daemon
//!
//! Speaks line-delimited JSON on stdin/stdout; logs go to stderr.

use chrono::Utc;
use kickoff::config::{self, Config, StoreBackend};
use kickoff::db::{Database, RatingProvider};
use kickoff::dispatch::{ChatContext, Dispatcher};
use kickoff::store::{MemoryStore, RedbStore, SessionStore};
use kickoff::{gateway, http, metrics};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Refreshes buffered between chat workers and the output writer.
const REFRESH_BUFFER: usize = 1024;

/// Maintenance sweep period.
const MAINTENANCE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the JSON protocol, so logs must go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("KICKOFF_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        return Err(anyhow::anyhow!(
            "{} configuration error(s) in {config_path}",
            errors.len()
        ));
    }

    info!(
        server = %config.server.name,
        capacity = config.session.capacity,
        "Starting kickoffd"
    );

    let db = Database::new(&config.database.path).await?;
    let ratings: Arc<dyn RatingProvider> = Arc::new(db);

    let store: Arc<dyn SessionStore> = match config.store.backend {
        StoreBackend::Redb => Arc::new(RedbStore::open(&config.store.path)?),
        StoreBackend::Memory => {
            warn!("Using in-memory session store; sessions are lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_BUFFER);
    let ctx = ChatContext::new(&config, store, ratings, refresh_tx);
    let dispatcher = Arc::new(Dispatcher::new(ctx));

    // Convention: metrics_port = 0 disables the HTTP endpoint (used by tests).
    let metrics_port = config.server.metrics_port.unwrap_or(9090);
    if metrics_port == 0 {
        info!("Metrics disabled");
    } else {
        metrics::init();
        info!("Metrics initialized");

        tokio::spawn(async move {
            http::run_http_server(metrics_port).await;
        });
        info!(port = metrics_port, "Prometheus HTTP server started");
    }

    // Sweep stale cooldowns and forget exited chat workers.
    {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                interval.tick().await;
                dispatcher.limiter().cleanup(Utc::now());
                let pruned = dispatcher.prune_closed();
                let stats = dispatcher.limiter().stats();
                info!(
                    pruned_chats = pruned,
                    active_chats = dispatcher.active_chats(),
                    cooldown_entries = stats.tracked_entries,
                    "Maintenance completed"
                );
            }
        });
    }
    info!("Maintenance task started");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    gateway::run(
        dispatcher,
        refresh_rx,
        tokio::io::stdin(),
        tokio::io::stdout(),
        shutdown,
    )
    .await?;

    info!("kickoffd stopped");
    Ok(())
}
