//! Configuration view and validation commands: `tasklane config`.

use std::path::Path;

use anyhow::{Context, Result, bail};

use tasklane::config::{CONFIG_FILE, TasklaneConfig};

use crate::ConfigCommands;

pub fn cmd_config(
    dir: &Path,
    config: &TasklaneConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                for warning in &warnings {
                    println!("warning: {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            let path = dir.join(CONFIG_FILE);
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            TasklaneConfig::default().save(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
