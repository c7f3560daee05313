use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{init_structured_logging, EnvSource, LoggingConfig};

mod commands;

use commands::{CandidatesCommand, GenerateCommand};

#[derive(Parser)]
#[command(name = "diary-router")]
#[command(about = "Turn transcriptions into diary notes through a fault-tolerant LLM router")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a diary note from a transcription file
    Generate(GenerateCommand),
    /// Show configured candidates in routing order
    Candidates(CandidatesCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let logging = LoggingConfig::from_source(&EnvSource::process())?;
    init_structured_logging(logging)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate(cmd) => cmd.execute().await,
        Commands::Candidates(cmd) => cmd.execute(),
    }
}
