use clap::Subcommand;
use uuid::Uuid;

use crate::cli::utils::output_value;
use crate::cli::OutputFormat;
use crate::permissions::{catalog, PermissionContext, Principal};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum PermissionCommands {
    #[command(about = "List permission keys by category")]
    Catalog,

    #[command(about = "Resolve one permission for a user and show which source decided")]
    Check {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long, help = "Permission key, e.g. canManageGrades")]
        key: String,
        #[arg(long, help = "Role to resolve with (the stored role when omitted)")]
        role: Option<String>,
        #[arg(long)]
        institution_id: Option<String>,
        #[arg(long)]
        school_id: Option<String>,
    },
}

pub async fn handle(cmd: PermissionCommands, state: &AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        PermissionCommands::Catalog => output_value(output_format, &catalog::catalog_json()?),
        PermissionCommands::Check {
            user_id,
            key,
            role,
            institution_id,
            school_id,
        } => {
            let principal = match role {
                Some(role) => Principal::new(user_id, catalog::canonical_role(&role)),
                None => state.access.principal_for(user_id).await?,
            };
            let context = match (school_id, institution_id) {
                (Some(school), _) => PermissionContext::school(school),
                (None, Some(institution)) => PermissionContext::institution(institution),
                (None, None) => PermissionContext::global(),
            };
            let resolution = state.resolver().resolve(&principal, &key, &context).await?;
            output_value(output_format, &resolution)
        }
    }
}
