//! kvdb - command-line interface.
//!
//! Runs a single operation against a store, or an interactive REPL when no
//! subcommand is given.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kvdb::db::{format_bytes, Lifecycle, Repl, ReplConfig, Store, StoreConfig};

const DEFAULT_PATH: &str = ".kvdb";

/// Command-line client for a kvdb store
#[derive(Debug, Parser)]
#[command(name = "kvdb", about = "Transactional key-value store CLI", version)]
struct Cli {
    /// Path to the store directory (default: .kvdb)
    #[arg(short = 'd', long, global = true)]
    path: Option<PathBuf>,

    /// Engine lifecycle: persistent or per-operation
    #[arg(short, long, global = true)]
    lifecycle: Option<Lifecycle>,

    /// Load store options from a JSON file; --path and --lifecycle override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Fail instead of creating a missing store directory
    #[arg(long, global = true)]
    must_exist: bool,

    /// Engine page cache size in bytes
    #[arg(long, global = true, value_name = "BYTES")]
    cache_size: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the value of a key
    Get { key: String },
    /// Insert or overwrite a key
    Set { key: String, value: String },
    /// Write several key=value pairs atomically
    Mset {
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
    /// Delete a key
    Del { key: String },
    /// Print every pair in key order
    Dump {
        /// Print a JSON object instead of lines
        #[arg(long)]
        json: bool,
    },
    /// Print store statistics
    Stats,
    /// Start the interactive REPL (default)
    Repl {
        /// Show timing for each statement
        #[arg(long)]
        timing: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(file) => StoreConfig::from_file(file)
            .with_context(|| format!("failed to load config {}", file.display()))?,
        None => StoreConfig::new(DEFAULT_PATH),
    };
    if let Some(path) = &cli.path {
        config.path = path.clone();
    }
    if let Some(lifecycle) = cli.lifecycle {
        config.lifecycle = lifecycle;
    }
    if let Some(bytes) = cli.cache_size {
        config.cache_size = Some(bytes);
    }
    if cli.must_exist {
        config.create_if_missing = false;
    }
    Ok(config)
}

fn parse_pair(pair: &str) -> anyhow::Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("expected KEY=VALUE, got '{}'", pair),
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;
    let path = config.path.clone();
    let store =
        Store::open(config).with_context(|| format!("failed to open store {}", path.display()))?;

    let code = match cli.command.unwrap_or(Command::Repl { timing: false }) {
        Command::Get { key } => match store.get(&key) {
            Ok(value) => {
                println!("{}", format_bytes(&value));
                ExitCode::SUCCESS
            }
            Err(e) if e.is_not_found() => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
            Err(e) => return Err(e.into()),
        },
        Command::Set { key, value } => {
            store.set(&key, &value)?;
            ExitCode::SUCCESS
        }
        Command::Mset { pairs } => {
            let pairs = pairs
                .iter()
                .map(|pair| parse_pair(pair))
                .collect::<anyhow::Result<Vec<_>>>()?;
            store.multi_set(pairs)?;
            ExitCode::SUCCESS
        }
        Command::Del { key } => {
            store.del(&key)?;
            ExitCode::SUCCESS
        }
        Command::Dump { json } => {
            let records = store.dump()?;
            if json {
                let readable: BTreeMap<String, String> = records
                    .iter()
                    .map(|(k, v)| (format_bytes(k), format_bytes(v)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&readable)?);
            } else {
                for (key, value) in &records {
                    println!("{}\t{}", format_bytes(key), format_bytes(value));
                }
            }
            ExitCode::SUCCESS
        }
        Command::Stats => {
            println!("{}", store.stats()?);
            ExitCode::SUCCESS
        }
        Command::Repl { timing } => {
            let config = ReplConfig {
                timing,
                ..ReplConfig::default()
            };
            let mut repl = Repl::with_config(store, config);
            repl.run()?;
            repl.into_store().close()?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    store.close()?;
    Ok(code)
}
