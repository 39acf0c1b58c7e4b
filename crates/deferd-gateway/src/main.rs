use clap::Parser;
use deferd_core::config::DeferdConfig;
use deferd_scheduler::{EngineOptions, SchedulerEngine, SqlitePersistence};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod app;
mod http;
mod work;

/// deferd: delayed and recurring job scheduler with an HTTP API.
#[derive(Parser)]
#[command(name = "deferd-gateway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to deferd.toml (falls back to DEFERD_CONFIG, then ~/.deferd/deferd.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "deferd_gateway=info,deferd_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    // load config: --config > DEFERD_CONFIG env > ~/.deferd/deferd.toml
    let config_path = cli.config.or_else(|| std::env::var("DEFERD_CONFIG").ok());
    let config = DeferdConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        DeferdConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let persistence = Arc::new(SqlitePersistence::new(db)?);
    info!("database migrations complete");

    let work = Arc::new(work::LogWork::new(Duration::from_millis(
        config.executor.simulated_work_ms,
    )));
    let (engine, scheduler) =
        SchedulerEngine::new(persistence, work, EngineOptions::from(&config))?;
    info!(
        restored = scheduler.stats().total,
        "job state restored from database"
    );

    let state = Arc::new(app::AppState::new(config, scheduler));
    let router = app::build_router(state.clone());

    // spawn scheduler engine loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", state.config.gateway.bind, state.config.gateway.port)
        .parse()?;
    info!("deferd gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal scheduler to stop and wait for in-flight jobs
    let _ = shutdown_tx.send(true);
    engine_task.await?;
    info!("deferd gateway stopped");
    Ok(())
}

/// Resolves on Ctrl-C (or SIGTERM on unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
