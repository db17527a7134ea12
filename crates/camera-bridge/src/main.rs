//! Camera Protocol Bridge - Main Entry Point

use std::path::PathBuf;
use std::sync::Arc;

use camera_bridge::{init_logging, load_config, run_self_test};
use camera_device::SimulatedCamera;
use camera_protocol::Session;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path.as_deref())?;
    init_logging(&config.log_level, config.json_logs)?;

    info!("=== Camera Protocol Bridge v{} ===", env!("CARGO_PKG_VERSION"));

    let camera = Arc::new(SimulatedCamera::new());
    let session = Session::attach(config.cport, camera, config.session.clone())?;

    if config.self_test {
        match run_self_test(&session, &config.self_test_streams).await {
            Ok(report) => match report.to_json() {
                Ok(json) => info!("Self-test report: {}", json),
                Err(err) => error!("Cannot encode self-test report: {}", err),
            },
            Err(err) => error!("Self-test failed: {}", err),
        }
    }

    info!("Serving cport {}, Ctrl-C to stop", config.cport);
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Cannot wait for Ctrl-C: {}", err);
    }

    session.detach().await;
    Ok(())
}
