//! Database initialization command: `tasklane init`.

use std::path::PathBuf;

use anyhow::{Context, Result};

use tasklane::board::db::BoardDb;
use tasklane::config::TasklaneConfig;

pub fn cmd_init(config: &TasklaneConfig, db_path: Option<PathBuf>, board: Option<&str>) -> Result<()> {
    let db_path = db_path.unwrap_or_else(|| config.database.path.clone());
    let db = BoardDb::open(&db_path, config.database.busy_timeout())
        .context("Failed to initialize board database")?;
    println!("Board database initialized at {}", db_path.display());

    if let Some(name) = board {
        let board = db
            .create_board(name, None, None)
            .with_context(|| format!("Failed to create board '{}'", name))?
            .value;
        println!("Created board {} ({})", board.id, board.name);
    }
    Ok(())
}
