mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "driftmark",
    version,
    about = "Checkpointed incremental loads and SCD2 dimensions"
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
    /// Run a pipeline: extract, merge, advance the watermark
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Create the pipeline's control and warehouse tables
    Init {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Show the latest watermark and recent runs
    Status {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Maximum history entries to show
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { pipeline } => commands::run::execute(&pipeline),
        Commands::Init { pipeline } => commands::init::execute(&pipeline),
        Commands::Status { pipeline, limit } => commands::status::execute(&pipeline, limit),
    }
}
