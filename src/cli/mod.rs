pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "portalctl")]
#[command(about = "Operator CLI for the educational portal API: tokens, cache, permissions and sessions")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Issue access tokens backed by a new session")]
    Token {
        #[command(subcommand)]
        cmd: commands::token::TokenCommands,
    },

    #[command(about = "Inspect and invalidate the response and data cache")]
    Cache {
        #[command(subcommand)]
        cmd: commands::cache::CacheCommands,
    },

    #[command(about = "Permission catalog and resolution")]
    Permissions {
        #[command(subcommand)]
        cmd: commands::permissions::PermissionCommands,
    },

    #[command(about = "Session statistics and cleanup")]
    Sessions {
        #[command(subcommand)]
        cmd: commands::sessions::SessionCommands,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    // Commands act on the same stores the server uses, as configured by the environment.
    let state = AppState::build(AppConfig::from_env()).await?;

    match cli.command {
        Commands::Token { cmd } => commands::token::handle(cmd, &state, output_format).await,
        Commands::Cache { cmd } => commands::cache::handle(cmd, &state, output_format).await,
        Commands::Permissions { cmd } => commands::permissions::handle(cmd, &state, output_format).await,
        Commands::Sessions { cmd } => commands::sessions::handle(cmd, &state, output_format).await,
    }
}
