//! Configuration view and validation commands: `phasekit config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use phasekit::config::Config;
    use phasekit::phase::manager::PLANNING_DIR;
    use phasekit::settings::{CONFIG_FILE, Settings};

    let planning_dir = project_dir.join(PLANNING_DIR);
    let config_path = planning_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("phasekit Configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            // File values with env overrides applied
            let config = Config::new(project_dir.to_path_buf(), false)?;
            print!("{}", config.settings.to_toml()?);
            println!();
            for warning in &config.warnings {
                println!("warning: {}", warning);
            }
            if !config_path.exists() {
                println!("Run 'phasekit config init' to create a config.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No config.toml found. Using defaults (valid).");
                return Ok(());
            }

            let settings = Settings::load(&config_path)?;
            let warnings = settings.validate();

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
                println!("config.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !planning_dir.exists() {
                std::fs::create_dir_all(&planning_dir)?;
            }

            Settings::default().save(&config_path)?;

            println!("Created config.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [runner] command, args");
            println!("  - [execution] dependency_mode, max_attempts, backoff_ms, auto_commit");
            println!("  - [git] author_name, author_email");
            println!();
        }
    }

    Ok(())
}
