//! Nodedash server entry point
//!
//! Serves:
//! - Uplink ingestion at POST /api/uplinks
//! - Flow-run history at /api/flow-runs/{id}
//! - Registry reloads at /api/flows/reload
//! - Health check at /healthz

use nodedash::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration comes from NODEDASH_* environment variables
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
