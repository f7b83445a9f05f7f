use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use fdf_curate::config::PipelineConfig;
use fdf_curate::runtime;

#[derive(Parser)]
#[command(name = "fdf")]
#[command(about = "Document curation: repetition filtering and near-duplicate resolution", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline from YAML configuration
    Run {
        /// Path to pipeline YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a pipeline configuration
    Validate {
        /// Path to pipeline YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run { config } => {
            let pipeline = PipelineConfig::from_yaml_file(&config)?;
            let stats = runtime::run_pipeline(&pipeline)?;
            for step in &stats.steps {
                println!("{}", step);
            }
        }
        Commands::Validate { config } => {
            let pipeline = PipelineConfig::from_yaml_file(&config)?;
            println!(
                "✓ Pipeline '{}' is valid ({} steps)",
                pipeline.name,
                pipeline.steps.len()
            );
        }
        Commands::Version => {
            println!("fdf version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
