mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "bulkhaul",
    version,
    about = "Transactional bulk loader with pluggable inputs, filters and outputs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Continue from the resume state a failed run left behind
        #[arg(long)]
        resume: bool,
        /// Write the next configuration (user config plus stage diffs) here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Sample records through the filters without loading the output
    Preview {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Maximum rows to sample
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print configuration the input and output would add
    Guess {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Abandon a partially completed run and release its resources
    Cleanup {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Show recent runs of a pipeline
    History {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Number of runs to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// List available plugins
    Plugins,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            pipeline,
            resume,
            output,
        } => commands::run::execute(&pipeline, resume, output.as_deref()).await,
        Commands::Preview { pipeline, limit } => {
            commands::preview::execute(&pipeline, limit).await
        }
        Commands::Guess { pipeline } => commands::guess::execute(&pipeline).await,
        Commands::Cleanup { pipeline } => commands::cleanup::execute(&pipeline).await,
        Commands::History { pipeline, limit } => {
            commands::history::execute(&pipeline, limit).await
        }
        Commands::Plugins => {
            commands::plugins::execute();
            Ok(())
        }
    }
}
