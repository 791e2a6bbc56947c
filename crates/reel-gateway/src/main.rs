use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use reel_core::config::ReelConfig;
use reel_gateway::app;
use reel_jobs::{HandlerRegistry, JobId, JobManager, JobRepository, NewJob};
use tokio::signal;
use tracing::{info, warn};

/// Reel job manager: scheduled library maintenance over HTTP.
#[derive(Parser, Debug)]
#[command(name = "reel-gateway", version, about, long_about = None)]
struct Args {
    /// Path to reel.toml (default: ~/.reel/reel.toml)
    #[arg(short, long, env = "REEL_CONFIG")]
    config: Option<String>,

    /// Address to bind (overrides config file)
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reel_gateway=info,reel_jobs=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = ReelConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ReelConfig::default()
    });
    if let Some(bind) = args.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    let manager = Arc::new(JobManager::new(
        config.scheduler.clone(),
        HandlerRegistry::with_builtins(),
    ));

    let repo = if config.database.persist {
        let db_path = &config.database.path;
        ensure_parent_dir(db_path)?;
        let repo = JobRepository::open(db_path)?;
        for job in repo.load_jobs()? {
            let id = job.id.clone();
            if let Err(e) = manager.restore_job(job) {
                warn!(job_id = %id, "stored job skipped: {e}");
            }
        }
        Some(repo)
    } else {
        None
    };

    // Config-declared jobs are only created once; stored edits win.
    for seed in &config.jobs {
        if manager.get_job(&JobId::from(seed.id.as_str())).is_ok() {
            continue;
        }
        match manager.add_job(NewJob::from(seed)) {
            Ok(job) => {
                if let Some(repo) = &repo {
                    repo.save_job(&job)?;
                }
            }
            Err(e) => warn!(job_id = %seed.id, "seed job rejected: {e}"),
        }
    }
    info!(jobs = manager.get_jobs().len(), "jobs loaded");

    manager.start();

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, Arc::clone(&manager), repo));
    let router = app::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Reel gateway listening on {}", addr);

    // Stopping the manager first ends open event streams so axum can drain.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            manager.stop().await;
        })
        .await?;

    info!("Reel gateway stopped");
    Ok(())
}

fn ensure_parent_dir(path: &str) -> anyhow::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
