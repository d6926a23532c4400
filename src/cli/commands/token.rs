use anyhow::Context;
use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{issue_access_token, Claims};
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::permissions::catalog::canonical_role;
use crate::sessions::{ClientInfo, SessionUser};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Create a session and print its access and refresh tokens")]
    Issue {
        #[arg(long, help = "User id (random when omitted)")]
        user_id: Option<Uuid>,
        #[arg(long, help = "Email")]
        email: String,
        #[arg(long, help = "Display name", default_value = "Portal user")]
        name: String,
        #[arg(long, help = "Role, e.g. SYSTEM_ADMIN or TEACHER")]
        role: String,
        #[arg(long, help = "Institution the user belongs to")]
        institution_id: Option<String>,
        #[arg(long, help = "Keep the session for the refresh token lifetime")]
        remember: bool,
    },
}

pub async fn handle(cmd: TokenCommands, state: &AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Issue {
            user_id,
            email,
            name,
            role,
            institution_id,
            remember,
        } => {
            let user = SessionUser {
                user_id: user_id.unwrap_or_else(Uuid::new_v4),
                email,
                name,
                role: canonical_role(&role),
                institution_id,
                permissions: Vec::new(),
            };
            let client = ClientInfo {
                ip_address: None,
                user_agent: Some("portalctl".to_string()),
            };

            let session = state
                .sessions
                .create_session(&user, &client, remember)
                .await
                .context("failed to create session")?;
            let security = &state.config.security;
            let claims = Claims::new(&user, session.session_id.clone(), security.jwt_expiry_hours);
            let access_token = issue_access_token(&claims, security).context("failed to sign access token")?;

            match output_format {
                OutputFormat::Text => {
                    println!("user_id:       {}", user.user_id);
                    println!("session_id:    {}", session.session_id);
                    println!("access_token:  {}", access_token);
                    println!("refresh_token: {}", session.refresh_token);
                    Ok(())
                }
                OutputFormat::Json => output_success(
                    output_format,
                    "Token issued",
                    Some(json!({
                        "user_id": user.user_id,
                        "session_id": session.session_id,
                        "access_token": access_token,
                        "refresh_token": session.refresh_token,
                        "expires_in": session.expires_in,
                    })),
                ),
            }
        }
    }
}
