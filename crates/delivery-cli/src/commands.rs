//! Command implementations.

use anyhow::{Context, Result};
use delivery_core::{DeliveryClient, DeliveryConfig, ElementValueStrategy, ResolverRegistry};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::{Cli, Commands, OutputFormat};
use crate::output::{render_document, render_item};

/// Run the selected command.
pub async fn execute(cli: Cli, cancel: &CancellationToken) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Item {
            codename,
            element,
            resolve,
            format,
        } => item(config, &codename, element.as_deref(), &resolve, format, cancel).await,
        Commands::Items { params, format } => items(config, &params, format, cancel).await,
    }
}

fn load_config(cli: &Cli) -> Result<DeliveryConfig> {
    let config = match &cli.config {
        Some(path) => {
            let mut config = DeliveryConfig::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env();
            config
        },
        None => DeliveryConfig::load()?,
    };
    debug!(environment = %config.environment_id, base_url = config.active_base_url(), "Loaded config");
    Ok(config)
}

fn registry(resolve: &[(String, String)]) -> ResolverRegistry {
    let mut registry = ResolverRegistry::new();
    for (content_type, element) in resolve {
        registry.register(content_type.as_str(), ElementValueStrategy::new(element.as_str()));
    }
    registry
}

async fn item(
    config: DeliveryConfig,
    codename: &str,
    element: Option<&str>,
    resolve: &[(String, String)],
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let client = DeliveryClient::new(config, registry(resolve))?;
    let response = client.get_item(codename, cancel).await?;

    match (element, format) {
        (Some(element), OutputFormat::Text) => {
            let doc = client.rich_text(&response, element)?;
            print!("{}", render_document(&doc));
        },
        (Some(element), OutputFormat::Json) => {
            let doc = client.rich_text(&response, element)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        },
        (None, OutputFormat::Text) => print!("{}", render_item(&response.item)),
        (None, OutputFormat::Json) => println!("{}", serde_json::to_string_pretty(&response)?),
    }
    Ok(())
}

async fn items(
    config: DeliveryConfig,
    params: &[(String, String)],
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let client = DeliveryClient::new(config, ResolverRegistry::new())?;
    let query: Vec<(&str, &str)> = params
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    let listing = client.get_items(&query, cancel).await?;

    match format {
        OutputFormat::Text => {
            for item in &listing.items {
                println!("{}\t{}\t{}", item.codename(), item.content_type(), item.system.name);
            }
            if let Some(total) = listing.pagination.as_ref().and_then(|p| p.total_count) {
                println!("{} of {total}", listing.items.len());
            }
        },
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&listing)?),
    }
    Ok(())
}
