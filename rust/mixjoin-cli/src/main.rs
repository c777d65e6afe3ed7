// rust/mixjoin-cli/src/main.rs

//! Mixjoin command-line driver
//!
//! Runs the data module steps from a shell: materialize the keyed store,
//! generate synthetic sources, or print joined batches.
//!
//! # Usage
//!
//! ```bash
//! # Write df.parquet and the data/ shard directory
//! mixjoin generate
//!
//! # Materialize data.sqlite from df.parquet
//! mixjoin prepare
//!
//! # Print five batches
//! mixjoin --config mixjoin.toml iterate --batches 5
//! ```

mod generate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mixjoin_core::{MixedDataModule, MixjoinConfig, Stage};

/// Mixed-source join loader
#[derive(Parser, Debug)]
#[command(name = "mixjoin")]
#[command(about = "Join chunked shards with a keyed SQLite table for training")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Materialize the keyed store from the Parquet table
    Prepare,

    /// Generate a synthetic Parquet table and shard directory
    Generate {
        /// Rows in the Parquet table (ids 0..rows)
        #[arg(long, default_value = "20000")]
        rows: usize,

        /// Shard records (ids 1..=records)
        #[arg(long, default_value = "9999")]
        records: u64,

        /// Seed for the random feature columns
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Print joined batches as JSON lines
    Iterate {
        /// Number of batches to print
        #[arg(short, long, default_value = "5")]
        batches: usize,

        /// Read through the async stream instead of the worker iterator
        #[arg(long)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => MixjoinConfig::from_file(path)?,
        None => MixjoinConfig::default(),
    }
    .with_env_overrides();
    let mut module = MixedDataModule::new(config)?;

    match args.command {
        Command::Prepare => {
            let report = module.prepare_data()?;
            if report.created {
                tracing::info!(
                    "Materialized {} rows into table '{}'",
                    report.rows_written,
                    report.table
                );
            } else {
                tracing::info!("Table '{}' already exists, nothing to do", report.table);
            }
        }
        Command::Generate {
            rows,
            records,
            seed,
        } => {
            if records >= rows as u64 {
                return Err(format!(
                    "--records ({records}) must be below --rows ({rows}) so every shard id has a row"
                )
                .into());
            }
            generate::write_table(&module, rows, seed)?;
            let index = generate::write_shards(&module, records)?;
            tracing::info!(
                "Wrote {} shard records in {} shards",
                index.total_samples(),
                index.shards.len()
            );
        }
        Command::Iterate { batches, stream } => {
            module.setup(Stage::Fit)?;
            let loader = module.train_loader()?;

            if stream {
                let mut rx = loader.into_stream()?;
                for _ in 0..batches {
                    match rx.recv().await {
                        Some(batch) => println!("{}", serde_json::to_string(&batch?)?),
                        None => break,
                    }
                }
            } else {
                for batch in loader.iter()?.take(batches) {
                    println!("{}", serde_json::to_string(&batch?)?);
                }
            }
        }
    }

    Ok(())
}
