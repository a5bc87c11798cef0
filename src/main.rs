use std::sync::Arc;

use apiplane::{
    api::start_admin_server,
    xds::start_ads_server,
    GatewayController, Result, Settings, APP_NAME, VERSION,
};
use clap::Parser;
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "apiplane", version, about = "API gateway control plane")]
struct Cli {
    /// Path to a TOML settings file
    #[arg(long)]
    config: Option<String>,

    /// Log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present; only real parse errors are worth reporting.
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: error loading .env file: {e}");
        }
    }

    let cli = Cli::parse();
    apiplane::init_tracing(&cli.log_level, cli.json_logs)?;
    apiplane::observability::init_metrics()?;

    info!(app_name = APP_NAME, version = VERSION, "Starting apiplane control plane");

    let settings = Arc::new(Settings::load(cli.config.as_deref())?);
    info!(
        xds_port = settings.xds.port,
        xds_bind_address = %settings.xds.bind_address,
        admin_port = settings.admin.port,
        semantic_versioning = settings.gateway.enable_semantic_versioning,
        "Loaded configuration"
    );

    let controller = Arc::new(GatewayController::new(settings.clone()));

    let ads = {
        let settings = settings.clone();
        let controller = controller.clone();
        tokio::spawn(async move { start_ads_server(&settings, controller).await })
    };
    let admin = {
        let settings = settings.clone();
        let controller = controller.clone();
        tokio::spawn(async move { start_admin_server(&settings, controller).await })
    };

    tokio::select! {
        result = ads => result.map_err(|e| apiplane::Error::internal(e.to_string()))??,
        result = admin => result.map_err(|e| apiplane::Error::internal(e.to_string()))??,
        _ = signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
