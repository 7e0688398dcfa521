use clap::Parser;
use ragflow::api::{create_router, spawn_progress_updater, AppState};
use ragflow::bootstrap;
use ragflow::infrastructure::{logging, AppConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

const BANNER: &str = r"
    ____   ___    ______ ______ __
   / __ \ /   |  / ____// ____// /____  _      __
  / /_/ // /| | / / __ / /_   / // __ \| | /| / /
 / _, _// ___ |/ /_/ // __/  / // /_/ /| |/ |/ /
/_/ |_|/_/  |_|\____//_/    /_/ \____/ |__/|__/
";

#[derive(Debug, Parser)]
#[command(name = "ragflow", about = "RAGFlow API server")]
struct Cli {
    /// Print the version and exit.
    #[arg(long)]
    version: bool,
    /// Log at debug level.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("RAGFlow version: {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    dotenvy::dotenv().ok();

    let app_config = AppConfig::load()?;
    let config = &app_config.config;
    logging::init(&config.logging, cli.debug || config.server.debug);

    info!("{BANNER}");
    info!(version = env!("CARGO_PKG_VERSION"), "RAGFlow starting");

    let services = bootstrap::services(&app_config)?;
    bootstrap::seed_catalog(&services, &app_config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let updater = spawn_progress_updater(
        services.tasks.clone(),
        Duration::from_secs(config.progress.interval_seconds.max(1)),
        shutdown_rx,
    );

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let state = AppState::new(services, app_config.clone());
    let app = create_router(state);

    info!("API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(bootstrap::shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    updater.await?;
    info!("API server stopped");

    Ok(())
}
