use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use evcal_adapters::EventExtractor as _;
use evcal_core::SystemClock;
use evcal_ingest::{build_offline_pipeline, export_rows, ExportResponse, IngestConfig, IngestOutcome};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "evcal")]
#[command(about = "Event calendar bot: LINE webhook, extraction and table export")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the webhook and read API.
    Serve,
    /// Print the event extracted from a message; nothing is stored.
    Extract(InputArgs),
    /// Run duplicate check, extraction and storage without sending a reply.
    Ingest(InputArgs),
    /// Print every stored row as the read API would.
    Export,
}

#[derive(Debug, Args)]
struct InputArgs {
    /// Message text.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    text: Option<String>,
    /// File holding the message text.
    #[arg(long)]
    file: Option<PathBuf>,
}

impl InputArgs {
    async fn read(&self) -> Result<String> {
        match (&self.text, &self.file) {
            (Some(text), _) => Ok(text.clone()),
            (None, Some(path)) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display())),
            (None, None) => anyhow::bail!("either --text or --file is required"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => evcal_web::serve_from_env().await?,
        Commands::Extract(input) => {
            let text = input.read().await?;
            let config = IngestConfig::from_env()?;
            let extractor = config.build_extractor(Arc::new(SystemClock))?;
            let event = extractor.extract(&text).await?.with_raw_text(text);
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
        Commands::Ingest(input) => {
            let text = input.read().await?;
            let config = IngestConfig::from_env()?;
            let pipeline = build_offline_pipeline(&config)?;
            match pipeline.ingest_text(&text).await {
                IngestOutcome::Failed(failure) => return Err(failure.into()),
                outcome => {
                    println!("{}", outcome.status());
                    if let Some(reply) = outcome.reply_text() {
                        println!("{reply}");
                    }
                }
            }
        }
        Commands::Export => {
            let config = IngestConfig::from_env()?;
            let store = config.build_store()?;
            let rows = export_rows(store.as_ref()).await?;
            let resp = ExportResponse {
                success: true,
                data: Some(rows),
                message: None,
            };
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,h2=warn"));
    let json = std::env::var("EVCAL_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    let initialized = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    initialized.context("initializing tracing")
}
