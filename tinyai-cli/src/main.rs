//! TinyAI CLI - Convert SafeTensors weights to quantized TinyAI artifacts.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tinyai_storage::StorageError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod common;
mod convert;
mod frontend;
mod inspect;
mod settings;

#[derive(Parser)]
#[command(name = "tinyai")]
#[command(about = "Convert model weights into compact quantized TinyAI artifacts")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a SafeTensors model to a TinyAI artifact (<stem>.json + <stem>.bin)
    Convert {
        /// Path to the model file or folder
        #[arg(short, long)]
        model: PathBuf,

        /// Output path; the extension is replaced by .json and .bin
        #[arg(short, long, default_value = "output/model")]
        output: PathBuf,

        /// Path to convert config JSON (optional)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Quantization bit width (4, 8, 16 or 32)
        #[arg(short, long)]
        bits: Option<u32>,

        /// Quantize biases at 8 bits regardless of --bits
        #[arg(long)]
        mixed_precision: bool,

        /// Zero weights with magnitude at or below this threshold
        #[arg(long)]
        prune_threshold: Option<f32>,

        /// Number of k-means clusters for weight sharing
        #[arg(long, allow_negative_numbers = true)]
        weight_clustering: Option<i64>,

        /// Record that graph optimization is disabled
        #[arg(long)]
        no_optimize: bool,

        /// Out-of-range 8-bit levels: wrap or saturate
        #[arg(long, value_parser = settings::parse_overflow)]
        int8_overflow: Option<tinyai_storage::Int8Overflow>,

        /// Seed for k-means centroid initialization
        #[arg(long)]
        cluster_seed: Option<u64>,

        /// Worker threads (default: all cores)
        #[arg(long)]
        threads: Option<usize>,

        /// Also write the conversion statistics as JSON
        #[arg(long)]
        stats_json: Option<PathBuf>,
    },

    /// Print the layout of a converted artifact
    Inspect {
        /// Path to the artifact (<stem>, <stem>.json or <stem>.bin)
        #[arg(short, long)]
        model: PathBuf,

        /// Print values of one tensor (owner.role)
        #[arg(short, long)]
        tensor: Option<String>,

        /// Maximum number of values to print
        #[arg(long, default_value_t = 16)]
        limit: usize,
    },

    /// Write a template convert config
    GenerateConfig {
        /// Where to write the template
        #[arg(short, long, default_value = "convert_config.json")]
        output: PathBuf,
    },
}

/// Exit status for settings rejected before any tensor is read.
const EXIT_INVALID_SETTINGS: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            let invalid_settings = err.chain().any(|cause| {
                cause
                    .downcast_ref::<StorageError>()
                    .is_some_and(StorageError::is_config_error)
            });
            if invalid_settings {
                ExitCode::from(EXIT_INVALID_SETTINGS)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Convert {
            model,
            output,
            config,
            bits,
            mixed_precision,
            prune_threshold,
            weight_clustering,
            no_optimize,
            int8_overflow,
            cluster_seed,
            threads,
            stats_json,
        } => {
            let flags = settings::Overrides {
                quantize_bits: bits,
                mixed_precision: mixed_precision.then_some(true),
                prune_threshold,
                weight_clustering,
                optimize: no_optimize.then_some(false),
                int8_overflow,
                cluster_seed,
            };
            convert::run(&convert::ConvertArgs {
                model,
                output,
                config,
                flags,
                threads,
                stats_json,
                show_progress: !cli.verbose,
            })?;
        }
        Commands::Inspect {
            model,
            tensor,
            limit,
        } => {
            inspect::run(&model, tensor.as_deref(), limit)?;
        }
        Commands::GenerateConfig { output } => {
            settings::generate_config_template(&output)?;
        }
    }

    Ok(())
}
