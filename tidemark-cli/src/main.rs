use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tidemark_core::checkpoint::{CheckpointContext, DataStore, FsDataStore};
use tidemark_core::config::{EngineConfig, LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

mod replay;

#[derive(Parser, Debug)]
#[command(name = "tidemark")]
#[command(about = "Event-time window replay and checkpoint inspection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed a JSON-lines recording through one windowed operator.
    Replay {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Recording to replay, `-` for stdin.
        #[arg(long)]
        input: PathBuf,
        /// Upstream input ports; 0 replays an event-time source.
        #[arg(long, default_value_t = 1)]
        input_ports: u32,
        #[arg(long)]
        checkpoint_every: Option<u64>,
        /// Restore the latest checkpoint before replaying.
        #[arg(long)]
        resume: bool,
    },
    /// List the checkpoints of one operator in a file-system store.
    Inspect {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        entry: String,
    },
    /// Load and validate a configuration file.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Replay {
            config,
            input,
            input_ports,
            checkpoint_every,
            resume,
        } => {
            let config = load_config(config.as_deref())?;
            init_tracing(&config.logging)?;
            let options = replay::ReplayOptions {
                input_ports,
                checkpoint_every,
                resume,
            };
            let reader = replay::input_reader(&input)?;
            let summary = replay::run(&config, &options, reader, std::io::stdout().lock())?;
            eprintln!(
                "replayed {} records: inserted={} late={} dropped={} unassigned={} checkpoints={}",
                summary.records,
                summary.inserted,
                summary.late,
                summary.dropped,
                summary.unassigned,
                summary.checkpoints
            );
        }
        Commands::Inspect { store, entry } => {
            init_tracing(&LoggingConfig::default())?;
            if !store.is_dir() {
                bail!("checkpoint store {} does not exist", store.display());
            }
            let store: Arc<dyn DataStore> = Arc::new(FsDataStore::new(&store)?);
            let context = CheckpointContext::new(store, entry.as_str());
            let checkpoints = context
                .list_checkpoints()
                .with_context(|| format!("listing checkpoints of {entry}"))?;
            println!("checkpoints={}", checkpoints.len());
            for (id, metadata) in checkpoints {
                println!(
                    "id={} base_id={} counter={} incremental={} interval={}",
                    id,
                    metadata.base_id,
                    metadata.counter,
                    metadata.has_incremental,
                    metadata.incremental_interval
                );
            }
        }
        Commands::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("invalid log level {:?}", logging.level))?;
    let layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Plain => fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .context("installing the tracing subscriber")
}

#[cfg(test)]
#[path = "tests/cli_tests.rs"]
mod tests;
