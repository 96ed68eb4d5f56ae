//! DMX CLI - Command-line interface
//!
//! Usage:
//!   dmx extract [--config params.toml] [--reset]
//!   dmx category <disease> --patterns <taxonomy.json>
//!   dmx pairs <annotated.jsonl> [--min-confidence 0.9]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dmx_core::{AppConfig, LoggingConfig};
use dmx_extractor::{
    association_pairs, read_jsonl, BatchDriver, CategoryResolver, CheckpointStore, Taxonomy,
};

#[derive(Parser)]
#[command(name = "dmx")]
#[command(about = "Disease mention extraction for drug labels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run checkpointed extraction over the configured label dump
    Extract {
        /// TOML configuration file (defaults and DMX_* variables otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Delete the checkpoint and start from the first record
        #[arg(long)]
        reset: bool,
    },
    /// Print the taxonomy category of a disease name
    Category {
        /// Disease name
        name: String,

        /// Disease taxonomy JSON
        #[arg(short, long)]
        patterns: PathBuf,
    },
    /// Emit drug-disease pairs from annotated output as JSONL
    Pairs {
        /// Annotated JSONL written by `extract`
        input: PathBuf,

        /// Drop mentions below this confidence
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f64,
    },
}

/// Install the global subscriber; logs go to stderr so stdout stays clean
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?
            .with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn extract(config: AppConfig, reset: bool) -> anyhow::Result<()> {
    if reset {
        CheckpointStore::new(&config.paths.checkpoint)
            .reset()
            .context("resetting checkpoint")?;
        tracing::info!("Checkpoint reset: {}", config.paths.checkpoint.display());
    }

    let mut driver = BatchDriver::from_config(&config).context("preparing extraction run")?;
    let summary = driver.run().context("extraction run failed")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn category(name: &str, patterns: PathBuf) -> anyhow::Result<()> {
    let taxonomy = Taxonomy::load(&patterns)
        .with_context(|| format!("loading taxonomy {}", patterns.display()))?;
    let resolver = CategoryResolver::new(Arc::new(taxonomy));
    println!("{}", resolver.lookup(name));
    Ok(())
}

fn pairs(input: PathBuf, min_confidence: f64) -> anyhow::Result<()> {
    let records =
        read_jsonl(&input).with_context(|| format!("reading {}", input.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut count = 0usize;
    for record in records {
        for pair in association_pairs(&serde_json::Value::Object(record), min_confidence) {
            serde_json::to_writer(&mut out, &pair)?;
            out.write_all(b"\n")?;
            count += 1;
        }
    }
    out.flush()?;

    tracing::info!("Wrote {} drug-disease pairs", count);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Extract { config, reset } => {
            let config = load_config(config)?;
            init_tracing(&config.logging);
            extract(config, reset)
        }
        Commands::Category { name, patterns } => {
            init_tracing(&LoggingConfig::default());
            category(&name, patterns)
        }
        Commands::Pairs {
            input,
            min_confidence,
        } => {
            init_tracing(&LoggingConfig::default());
            pairs(input, min_confidence)
        }
    }
}
