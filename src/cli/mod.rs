//! CLI module — command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod common;
pub mod config;
pub mod interactive;
pub mod listen;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "triggerclaw")]
#[command(version)]
#[command(about = "Ultra-lightweight trigger-driven AI assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for trigger events and process them until interrupted
    Listen,
    /// Run one instruction for one user and print the outcome
    Interactive {
        /// User id (e.g. email address) scoping sessions and connections
        #[arg(short, long)]
        user: String,
        /// The instruction to execute
        instruction: String,
    },
    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Check the config file for unknown fields and missing credentials
    Validate,
}

/// Parse arguments and dispatch to the selected command.
pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Listen => listen::cmd_listen().await,
        Commands::Interactive { user, instruction } => {
            interactive::cmd_interactive(&user, &instruction).await
        }
        Commands::Config { action } => config::cmd_config(action).await,
    }
}
