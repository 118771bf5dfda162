//! LeafGuard CLI
//!
//! Classifies leaf images against a few labeled exemplars per disease,
//! answering UNKNOWN for anything that does not clearly match a known class.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use leafguard_classifiers::DeviceType;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

mod commands;
mod config;

#[derive(Parser, Debug)]
#[command(name = "leafguard")]
#[command(about = "Open-set plant disease classification from leaf images", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "leafguard.yaml", env = "LEAFGUARD_CONFIG")]
    config: PathBuf,

    /// Encoder weights file (overrides the config file)
    #[arg(long, global = true, env = "LEAFGUARD_ENCODER_PATH")]
    encoder: Option<PathBuf>,

    /// Exemplar corpus root (overrides the config file)
    #[arg(long, global = true, env = "LEAFGUARD_EXEMPLAR_DIR")]
    exemplar_dir: Option<PathBuf>,

    /// Inference device: cpu, cuda, cuda:N, metal
    #[arg(long, global = true, env = "LEAFGUARD_DEVICE")]
    device: Option<DeviceType>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify one or more images
    Predict {
        /// Image files
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Similarity threshold (defaults to the calibrated one)
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Print one JSON object per image
        #[arg(long)]
        json: bool,
    },

    /// Build prototypes and report the calibrated threshold
    Calibrate {
        /// Percentile of same-class similarities to use as the threshold
        #[arg(short, long, env = "LEAFGUARD_PERCENTILE")]
        percentile: Option<f32>,
    },

    /// Classify image paths read from stdin; SIGHUP retrains
    Watch {
        /// Serve Prometheus metrics on this address
        #[arg(long)]
        metrics_addr: Option<SocketAddr>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_format);

    let mut config = config::load(&cli)?;
    info!(
        "Configuration loaded (exemplars: {}, device: {})",
        config.exemplar_dir.display(),
        config.device
    );

    match cli.command {
        Command::Predict {
            images,
            threshold,
            json,
        } => commands::predict(config, &images, threshold, json).await,
        Command::Calibrate { percentile } => {
            if let Some(percentile) = percentile {
                config = config.with_percentile(percentile);
                config.validate()?;
            }
            commands::calibrate(config).await
        }
        Command::Watch { metrics_addr } => {
            if let Some(addr) = metrics_addr {
                init_metrics(addr)?;
            }
            commands::watch(config).await
        }
    }
}

/// Initialize tracing/logging on stderr, leaving stdout for results
fn init_tracing(verbose: bool, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    // "leafguard" prefixes every workspace crate's target
    let filter = if verbose {
        EnvFilter::new("leafguard=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("leafguard=info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

/// Install the Prometheus exporter with an HTTP listener
fn init_metrics(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "leafguard_predictions_total",
        "Total number of predictions by outcome"
    );
    metrics::describe_histogram!(
        "leafguard_predict_latency_us",
        metrics::Unit::Microseconds,
        "End-to-end prediction latency in microseconds"
    );
    metrics::describe_counter!(
        "leafguard_exemplars_skipped_total",
        "Exemplar images skipped because they could not be decoded"
    );
    metrics::describe_counter!("leafguard_retrains_total", "Completed prototype retrains");

    info!("Metrics exporter listening on http://{}/metrics", addr);
    Ok(())
}
