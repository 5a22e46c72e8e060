// VisionSafe server: PPE compliance dashboard API and batch video processing

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use visionsafe_core::VisionSafeConfig;
use visionsafe_server::{build_default_state, create_router};

#[derive(Debug, Parser)]
#[command(name = "visionsafe-server", version, about = "VisionSafe PPE compliance server")]
struct Args {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Root directory for the store, evidence, uploads and processed videos
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("Starting VisionSafe v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Strike policy: {} strikes, {}s cooldown, fired workers {:?}",
        config.ledger.max_strikes, config.ledger.cooldown_secs, config.ledger.fired_policy
    );

    let host = config.server.bind_host.clone();
    let port = config.server.port;
    let state = build_default_state(config).context("failed to initialize services")?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {}:{}", host, port))?;
    info!("HTTP server ready on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("HTTP server error")?;

    info!("VisionSafe stopped");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<VisionSafeConfig> {
    let mut config = match &args.config {
        Some(path) => VisionSafeConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => VisionSafeConfig::default(),
    };
    config.apply_env();
    if let Some(dir) = &args.data_dir {
        config.set_data_dir(dir);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;
    Ok(config)
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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
