//! Config check command handler.

use anyhow::{Context, Result};

use triggerclaw::config::validate::{validate_raw, validate_startup, DiagnosticLevel};
use triggerclaw::config::Config;

use super::ConfigAction;

/// Validate configuration file.
pub(crate) async fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Validate => {
            let config_path = Config::path();
            println!("Config file: {}", config_path.display());

            let mut has_errors = false;

            if config_path.exists() {
                let content = std::fs::read_to_string(&config_path)
                    .context("Failed to read config file")?;

                match serde_json::from_str::<serde_json::Value>(&content) {
                    Ok(raw) => {
                        for diagnostic in validate_raw(&raw) {
                            println!("{}", diagnostic);
                            if diagnostic.level == DiagnosticLevel::Error {
                                has_errors = true;
                            }
                        }
                    }
                    Err(e) => {
                        println!("[ERROR] Invalid JSON: {}", e);
                        has_errors = true;
                    }
                }
            } else {
                println!("[OK] No config file found (using defaults)");
            }

            // Semantic checks see env overrides too
            match Config::load() {
                Ok(config) => match validate_startup(&config) {
                    Ok(()) => println!("[OK] Required credentials present"),
                    Err(e) => {
                        println!("[ERROR] {}", e);
                        has_errors = true;
                    }
                },
                Err(e) => {
                    println!("[ERROR] {}", e);
                    has_errors = true;
                }
            }

            if has_errors {
                anyhow::bail!("configuration has errors");
            }
            Ok(())
        }
    }
}
