use anyhow::Result;
use clap::{Parser, Subcommand};
use doc_gateway::commands::{fetch_media, read_documents, show_config, write_documents};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docgate")]
#[command(about = "Read, write and fetch media for documents in a document store")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the default database
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configuration, writing defaults if none exists
    Config {
        /// Only show, never write a config file
        #[arg(long)]
        show: bool,
    },
    /// Read documents from a collection
    Read {
        collection: String,
        /// Document tag for a point lookup; filters are ignored when set
        #[arg(long)]
        id: Option<String>,
        /// Filter as "field op value", e.g. "price >= 10". Repeatable
        #[arg(long = "filter")]
        filters: Vec<String>,
    },
    /// Write new documents from a JSON file, or `-` for stdin
    Write {
        collection: String,
        input: PathBuf,
    },
    /// Fetch the media referenced by a URL field
    Media {
        collection: String,
        /// Field holding the media URL
        #[arg(long)]
        url_field: String,
        #[arg(long)]
        id: Option<String>,
        /// Save payloads into this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = cli.config_dir.as_deref();

    match cli.command {
        Commands::Config { show } => {
            show_config(config_dir, show)?;
        }
        Commands::Read {
            collection,
            id,
            filters,
        } => {
            read_documents(config_dir, &collection, id.as_deref(), &filters).await?;
        }
        Commands::Write { collection, input } => {
            write_documents(config_dir, &collection, &input).await?;
        }
        Commands::Media {
            collection,
            url_field,
            id,
            out,
        } => {
            fetch_media(
                config_dir,
                &collection,
                id.as_deref(),
                &url_field,
                out.as_deref(),
            )
            .await?;
        }
    }

    Ok(())
}
