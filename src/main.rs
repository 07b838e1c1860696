use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wagate::client::BridgeClientFactory;
use wagate::config::Config;
use wagate::qr::SvgQrRenderer;
use wagate::server::{self, AppState};
use wagate::session::{OsTerminator, SessionManager};
use wagate::store::MemoryStore;

// ============================================================================
// CLI Types
// ============================================================================

/// Wagate - multi-device WhatsApp gateway server
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();
    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;

    // CLI port overrides config
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Backing stores. The in-memory store serves as the default wiring;
    // a database-backed implementation plugs in through the same traits.
    let store = MemoryStore::new();
    let factory = BridgeClientFactory::new(config.manager.bridge_command.clone());

    let manager = SessionManager::new(
        config.manager.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(factory),
        Arc::new(OsTerminator),
        Arc::new(SvgQrRenderer),
    );

    // Reconnect devices that were connected when the process last stopped.
    manager.recover().await;

    let state = AppState {
        manager: manager.clone(),
        records: Arc::new(store.clone()),
        credentials: Arc::new(store),
    };

    let app = server::build_app(state, config.server.request_timeout_seconds);

    let ip: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(addr = %addr, "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
