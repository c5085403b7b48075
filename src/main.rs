mod cli;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hsknn::config::HsknnConfig;

#[derive(Parser)]
#[command(name = "hsknn", version, about = "HS code suggestions from a labeled product corpus")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build (or validate) embeddings and the classifier bundle
    Build {
        /// Discard persisted artifacts and rebuild everything
        #[arg(long)]
        force: bool,
    },
    /// Suggest HS codes for a product description
    Classify(ClassifyArgs),
    /// Place a description in the 2-D corpus layout
    Locate {
        text: String,
        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },
    /// Run artifact database diagnostics
    Doctor,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Args)]
pub struct ClassifyArgs {
    pub text: String,
    /// Country of origin
    #[arg(long)]
    pub origin: Option<String>,
    /// Destination country
    #[arg(long)]
    pub destination: Option<String>,
    /// Declared value (requires --currency)
    #[arg(long, requires = "currency")]
    pub value: Option<f64>,
    #[arg(long, requires = "value")]
    pub currency: Option<String>,
    /// Print the raw JSON response
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.hsknn/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HsknnConfig::load()?;

    // Log to stderr so stdout stays clean for --json output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Build { force } => cli::build::build(config, force).await?,
        Command::Classify(args) => cli::classify::classify(config, args).await?,
        Command::Locate { text, json } => cli::locate::locate(config, text, json).await?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
    }

    Ok(())
}
