mod config;
mod observability;
mod status;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use tracing::info;

use config::{apply_file_overrides, load_file_config, DefaultsUsed, LogBackend, NodeConfig};
use txlog_core::{Log, LocalLog, LocalLogOptions, MemoryLog};
use txlog_indexer::WatchRegistry;

#[derive(Parser)]
#[command(name = "txlog-node", about = "Transaction log ingestion pipeline node")]
struct Cli {
    #[command(flatten)]
    config: NodeConfig,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion pipeline (default if no subcommand is given).
    Run,
    /// Print a one-line summary of the watch registry's state.
    Status {
        #[arg(long)]
        json: bool,
    },
}

fn defaults_used(matches: &ArgMatches) -> DefaultsUsed {
    let is_default = |id: &str| matches!(matches.value_source(id), Some(ValueSource::DefaultValue) | None);
    DefaultsUsed {
        log_backend: is_default("log_backend"),
        log_path: is_default("log_path"),
        buffer_size: is_default("buffer_size"),
        log_max_segment_size: is_default("log_max_segment_size"),
        poll_sleep_duration: is_default("poll_sleep_duration"),
        flush_timeout: is_default("flush_timeout"),
        log_level: is_default("log_level"),
        metrics_listen_addr: is_default("metrics_listen_addr"),
    }
}

fn load_config() -> anyhow::Result<(NodeConfig, Option<Command>)> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).context("failed to parse CLI arguments")?;
    let defaults = defaults_used(matches.subcommand().map(|(_, m)| m).unwrap_or(&matches));

    let file_config = load_file_config(cli.config.config_file.as_ref())?;
    let config = apply_file_overrides(cli.config, file_config, &defaults);
    Ok((config, cli.command))
}

fn open_log(config: &NodeConfig) -> anyhow::Result<Arc<dyn Log>> {
    match config.log_backend {
        LogBackend::Memory => Ok(Arc::new(MemoryLog::new(4096))),
        LogBackend::Local => {
            let path = config.log_path.clone().context("log.path is required when log.backend = \"local\"")?;
            let opts = LocalLogOptions {
                buffer_size: config.buffer_size as usize,
                poll_sleep_duration: config.poll_sleep_duration,
            };
            Ok(Arc::new(LocalLog::open(path, opts)?))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, command) = load_config()?;
    observability::init_tracing(&config.log_level);
    let _registry = observability::build_registry();

    match command.unwrap_or(Command::Run) {
        Command::Run => {
            let log = open_log(&config)?;
            let watch_registry = Arc::new(WatchRegistry::new(Duration::from_secs(300)));
            info!(
                backend = ?config.log_backend,
                flush_timeout = ?config.flush_timeout,
                "txlog-node starting; wire an Indexer/TrieCatalog via txlog-indexer::Processor to begin ingesting"
            );
            // The node binary assembles configuration and observability
            // plumbing; the concrete Indexer/TrieCatalog implementation is
            // provided by the embedding storage engine, which is out of
            // scope here (see §1 Non-goals). Block so the process stays up
            // for metrics scraping once an embedder wires a pipeline in.
            let _ = log.latest_submitted_offset();
            let _ = watch_registry.high_water_mark();
            tokio::signal::ctrl_c().await.ok();
            Ok(())
        }
        Command::Status { json } => {
            let registry = WatchRegistry::new(Duration::from_secs(300));
            let report = status::StatusReport::summarize(&registry);
            if json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!("{report}");
            }
            Ok(())
        }
    }
}
