use anyhow::Result;
use tracing::info;

use teamspace::config::ServerConfig;
use teamspace::server::run_server;
use teamspace::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_telemetry()?;

    let config = ServerConfig::from_env()?;
    info!("Starting Teamspace with database {}", config.db_path);
    run_server(config).await
}
