use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::http::HttpServer;
use tollgate::quota::{CounterStore, QuotaPolicyEngine, Sweeper, SystemClock};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about = "Request quota enforcement service")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "TOLLGATE_CONFIG")]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Tollgate Quota Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TollgateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        trusted_proxies = config.server.trusted_proxies.len(),
        "Configuration loaded"
    );

    let policies = Arc::new(config.rate_limiting.build()?);

    // Build the counter store and its background sweep
    let settings = config.store.settings()?;
    let store = Arc::new(CounterStore::new(settings, Arc::new(SystemClock)));
    let sweeper = Sweeper::start(store.clone(), config.store.sweep_interval()?);
    info!(
        max_entries = settings.max_entries,
        max_entry_age_secs = settings.max_entry_age.as_secs(),
        "Counter store initialized"
    );

    let engine = Arc::new(QuotaPolicyEngine::new(store));

    let server = HttpServer::new(
        config.server.listen_addr,
        engine,
        policies,
        config.server.trusted_proxies,
    );
    let result = server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.stop().await;
    result?;

    info!("Tollgate Quota Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
