//! Board server command: `tasklane serve`.

use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

use tasklane::board::server::{ServerConfig, start_server};
use tasklane::config::TasklaneConfig;

pub async fn cmd_serve(
    mut config: TasklaneConfig,
    port: Option<u16>,
    host: Option<String>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(db_path) = db_path {
        config.database.path = db_path;
    }
    if dev {
        config.server.dev_mode = true;
    }

    for warning in config.validate() {
        warn!("{}", warning);
    }

    start_server(ServerConfig::from(&config)).await
}
