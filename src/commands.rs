use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{Config, get_config_dir};
use crate::document::{Filter, WriteBatch};
use crate::gateway::DocumentStoreGateway;

/// Resolve the config directory, falling back to `~/.docgate`
fn resolve_config_dir(config_dir: Option<&Path>) -> Result<PathBuf> {
    match config_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => get_config_dir().context("Failed to determine config directory"),
    }
}

fn load_config(config_dir: Option<&Path>) -> Result<Config> {
    let dir = resolve_config_dir(config_dir)?;
    Config::load(&dir).with_context(|| format!("Failed to load configuration from {}", dir.display()))
}

async fn open_gateway(config_dir: Option<&Path>) -> Result<DocumentStoreGateway> {
    let config = load_config(config_dir)?;
    DocumentStoreGateway::from_config(&config)
        .await
        .context("Failed to initialize backends")
}

/// Print the effective configuration, or write the defaults when no config
/// file exists yet
#[inline]
pub fn show_config(config_dir: Option<&Path>, show_only: bool) -> Result<()> {
    let config = load_config(config_dir)?;
    let config_path = config.config_file_path();

    if !show_only && !config_path.exists() {
        config.save().context("Failed to save configuration")?;
        println!("Wrote default configuration to {}", config_path.display());
        println!();
    }

    println!("Current Configuration");
    println!();

    println!("Document Store:");
    println!("  Backend: {}", config.documents.backend);
    println!("  Database: {}", config.database_path().display());
    println!("  Max Connections: {}", config.documents.max_connections);
    println!(
        "  Acquire Timeout: {}s",
        config.documents.acquire_timeout_seconds
    );

    println!();
    println!("Blob Store:");
    match config.blobs.endpoint_url() {
        Ok(url) => println!("  Endpoint: {}", url),
        Err(e) => println!("  Endpoint: Invalid ({})", e),
    }
    println!("  Timeout: {}s", config.blobs.timeout_seconds);
    println!("  Retry Attempts: {}", config.blobs.retry_attempts);
    println!("  Retry Backoff: {}ms", config.blobs.retry_backoff_ms);
    println!("  Max Download: {} bytes", config.blobs.max_download_bytes);

    println!();
    println!("Config file: {}", config_path.display());

    Ok(())
}

/// Read documents and print them as a JSON array
#[inline]
pub async fn read_documents(
    config_dir: Option<&Path>,
    collection: &str,
    identifier: Option<&str>,
    filters: &[String],
) -> Result<()> {
    let filters = filters
        .iter()
        .map(|raw| raw.parse::<Filter>())
        .collect::<crate::Result<Vec<_>>>()
        .context("Failed to parse filter")?;

    let gateway = open_gateway(config_dir).await?;
    let documents = gateway.read(collection, identifier, &filters).await?;

    info!("Read {} documents from {}", documents.len(), collection);
    println!(
        "{}",
        serde_json::to_string_pretty(&documents).context("Failed to serialize documents")?
    );

    Ok(())
}

/// Write documents from a JSON file, or stdin when `input` is `-`
#[inline]
pub async fn write_documents(config_dir: Option<&Path>, collection: &str, input: &Path) -> Result<()> {
    let raw = if input == Path::new("-") {
        io::read_to_string(io::stdin()).context("Failed to read documents from stdin")?
    } else {
        fs::read_to_string(input)
            .with_context(|| format!("Failed to read {}", input.display()))?
    };
    let batch: WriteBatch = serde_json::from_str(&raw).context("Input is not a document or array of documents")?;

    let gateway = open_gateway(config_dir).await?;
    let receipt = gateway.write(collection, batch).await?;

    println!(
        "Wrote {} documents to {}:",
        receipt.tags.len(),
        receipt.collection
    );
    for tag in &receipt.tags {
        println!("  {}", tag);
    }

    Ok(())
}

/// Fetch multimedia for the selected documents, optionally saving payloads
#[inline]
pub async fn fetch_media(
    config_dir: Option<&Path>,
    collection: &str,
    identifier: Option<&str>,
    url_field: &str,
    out_dir: Option<&Path>,
) -> Result<()> {
    let gateway = open_gateway(config_dir).await?;
    let records = gateway
        .read_multimedia(collection, identifier, url_field)
        .await?;

    if records.is_empty() {
        println!("No documents in {} reference media via '{}'", collection, url_field);
        return Ok(());
    }

    if let Some(dir) = out_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }

    println!("Fetched {} media records:", records.len());
    for (index, record) in records.iter().enumerate() {
        let content = &record.content;
        println!(
            "  {} ({} bytes, {})",
            content.location,
            content.len(),
            content.content_type.as_deref().unwrap_or("unknown type")
        );

        if let Some(dir) = out_dir {
            let target = dir.join(file_name_for(&content.location, index));
            if target.exists() {
                warn!("Overwriting {}", target.display());
            }
            fs::write(&target, &content.data)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            println!("    saved to {}", target.display());
        }
    }

    Ok(())
}

/// Last non-empty path segment of `location`, or a positional fallback
fn file_name_for(location: &url::Url, index: usize) -> String {
    location
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| format!("media-{}", index))
}
