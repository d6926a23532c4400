use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::{output_success, output_value};
use crate::cli::OutputFormat;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum CacheCommands {
    #[command(about = "Backend health and round-trip latency")]
    Health,

    #[command(about = "Number of cached keys under the prefix")]
    Stats,

    #[command(about = "Remove every cache entry")]
    Clear,

    #[command(about = "Invalidate entries by tag or key pattern")]
    Invalidate {
        #[arg(long, conflicts_with = "pattern", required_unless_present = "pattern")]
        tag: Option<String>,
        #[arg(long, help = "Glob relative to the cache prefix, e.g. 'resp:*'")]
        pattern: Option<String>,
    },

    #[command(about = "Run registered warmup tasks")]
    Warmup {
        #[arg(help = "Task names (all when omitted)")]
        names: Vec<String>,
    },
}

pub async fn handle(cmd: CacheCommands, state: &AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    let cache = &state.cache;
    match cmd {
        CacheCommands::Health => output_value(output_format, &cache.health_check().await),
        CacheCommands::Stats => {
            let keys = cache.backend().keys(&format!("{}*", cache.prefix())).await?;
            let tag_sets = keys.iter().filter(|k| k.starts_with(&format!("{}tag:", cache.prefix()))).count();
            output_value(
                output_format,
                &json!({
                    "backend": cache.backend().name(),
                    "enabled": cache.is_enabled(),
                    "prefix": cache.prefix(),
                    "keys": keys.len() - tag_sets,
                    "tag_sets": tag_sets,
                }),
            )
        }
        CacheCommands::Clear => {
            let removed = cache.clear().await;
            output_success(output_format, &format!("Removed {} keys", removed), Some(json!({ "removed": removed })))
        }
        CacheCommands::Invalidate { tag, pattern } => {
            let removed = match (tag, pattern) {
                (Some(tag), _) => cache.invalidate_tag(&tag).await,
                (None, Some(pattern)) => cache.delete_by_pattern(&pattern).await,
                (None, None) => anyhow::bail!("either --tag or --pattern is required"),
            };
            output_success(output_format, &format!("Removed {} keys", removed), Some(json!({ "removed": removed })))
        }
        CacheCommands::Warmup { names } => {
            let selected = if names.is_empty() { None } else { Some(names.as_slice()) };
            let report = cache.warmup(selected).await;
            output_value(output_format, &report)
        }
    }
}
