//! Task API server command: `opendev serve`.

use anyhow::Result;

use opendev::config::OpendevConfig;
use opendev::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    config: OpendevConfig,
    port: Option<u16>,
    host: Option<String>,
    dev: bool,
) -> Result<()> {
    let orchestrator = super::build_orchestrator(&config)?;

    let default_host = if dev {
        "0.0.0.0".to_string()
    } else {
        config.server.host.clone()
    };
    let server = ServerConfig {
        host: host.unwrap_or(default_host),
        port: port.unwrap_or(config.server.port),
        permissive_cors: dev || config.server.permissive_cors,
    };

    start_server(server, orchestrator).await
}
