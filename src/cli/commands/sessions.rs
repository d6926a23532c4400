use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::cli::utils::{output_success, output_value};
use crate::cli::OutputFormat;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum SessionCommands {
    #[command(about = "Active users and sessions per device")]
    Stats,

    #[command(about = "Drop index entries whose sessions expired")]
    Cleanup,

    #[command(about = "List the live sessions of a user")]
    List {
        #[arg(long)]
        user_id: Uuid,
    },

    #[command(about = "End every session of a user")]
    Terminate {
        #[arg(long)]
        user_id: Uuid,
    },
}

pub async fn handle(cmd: SessionCommands, state: &AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    let sessions = &state.sessions;
    match cmd {
        SessionCommands::Stats => output_value(output_format, &sessions.session_stats().await?),
        SessionCommands::Cleanup => {
            let removed = sessions.cleanup_expired().await?;
            output_success(
                output_format,
                &format!("Removed {} stale entries", removed),
                Some(json!({ "removed": removed })),
            )
        }
        SessionCommands::List { user_id } => output_value(output_format, &sessions.user_sessions(user_id).await?),
        SessionCommands::Terminate { user_id } => {
            let terminated = sessions.destroy_all_user_sessions(user_id).await?;
            output_success(
                output_format,
                &format!("Terminated {} sessions", terminated),
                Some(json!({ "terminated": terminated })),
            )
        }
    }
}
