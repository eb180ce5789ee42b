//! Configuration view and validation commands, `ispw-sync config`.

use anyhow::Result;
use std::path::Path;

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, workspace: &Path, command: Option<ConfigCommands>) -> Result<()> {
    use ispw_sync::sync_config::{CONFIG_FILE, STATE_DIR, SyncToml};

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| workspace.join(STATE_DIR).join(CONFIG_FILE));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("ISPW Sync Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No ispw-sync.toml found at {}", config_path.display());
                println!("Run 'ispw-sync config init' to create one.");
            }
            println!();

            let config = super::load_config(cli, workspace)?;
            let toml = &config.toml;

            println!("[ispw]");
            println!("  connection_id = \"{}\"", toml.ispw.connection_id);
            println!("  credentials_id = \"{}\"", toml.ispw.credentials_id);
            println!("  runtime_config = \"{}\"", toml.ispw.runtime_config);
            println!("  stream = \"{}\"", toml.ispw.stream);
            println!("  app = \"{}\"", toml.ispw.app);
            println!();

            println!("[branch_mapping]");
            match toml.branch_mapping() {
                Ok(mapping) => {
                    for rule in mapping.rules() {
                        println!(
                            "  {} => {}{}",
                            rule.pattern,
                            rule.level,
                            rule.container_pref
                                .as_deref()
                                .map(|p| format!(", {}", p))
                                .unwrap_or_default()
                        );
                    }
                    if !toml.branch_mapping.default_level.trim().is_empty() {
                        println!("  default_level = \"{}\"", toml.branch_mapping.default_level);
                    }
                }
                Err(e) => println!("  {} {:#}", console::style("invalid:").red(), e),
            }
            println!();

            if !toml.connections.is_empty() {
                println!("[connections]");
                for (id, conn) in &toml.connections {
                    println!(
                        "  {} = {}:{} (code page {})",
                        id, conn.host, conn.port, conn.code_page
                    );
                }
                println!();
            }

            // Secrets are never printed here, only where they come from.
            if !toml.credentials.is_empty() {
                println!("[credentials]");
                for (id, entry) in &toml.credentials {
                    let source = if let Some(var) = &entry.password_env {
                        format!("env {}", var)
                    } else if let Some(file) = &entry.password_file {
                        format!("file {}", file.display())
                    } else if entry.password.is_some() {
                        "inline".to_string()
                    } else {
                        "none".to_string()
                    };
                    println!("  {} = {} (password: {})", id, entry.username, source);
                }
                println!();
            }

            println!("Effective values (with env/CLI overrides):");
            println!(
                "  cli_install_dir = \"{}\"",
                config
                    .cli_install_dir()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
            println!("  clear_failures = {}", config.clear_failures());
            println!("  debug = {}", config.debug());
            println!("  queue_file = \"{}\"", config.queue_file().display());
            println!("  data_dir = \"{}\"", config.data_dir().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No ispw-sync.toml found at {}", config_path.display());
                return Ok(());
            }

            let config = super::load_config(cli, workspace)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("ispw-sync.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            SyncToml::default().save(&config_path)?;

            println!("Created ispw-sync.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [ispw] connection_id, credentials_id, stream, app");
            println!("  - [branch_mapping] mapping rules (pattern => level, container preference)");
            println!("  - [connections.<id>] and [credentials.<id>] entries");
            println!("  - [cli] install_dir of the Topaz Workbench CLI");
            println!();
        }
    }

    Ok(())
}
