//! Veil remote store server.
//!
//! Serves an in-memory hub over WebSocket. `VEIL_BIND` overrides the listen
//! address; `RUST_LOG` controls logging.

use log::info;
use veil_sync::{Hub, RemoteServer, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut config = ServerConfig::default();
    if let Ok(bind_addr) = std::env::var("VEIL_BIND") {
        config.bind_addr = bind_addr;
    }
    info!("Starting veil remote store on {}", config.bind_addr);

    let server = RemoteServer::new(config, Hub::new());
    if let Err(e) = server.run().await {
        log::error!("Server stopped: {e}");
        std::process::exit(1);
    }
}
