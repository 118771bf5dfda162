//! Subcommand implementations

use anyhow::Result;
use leafguard_classifiers::{
    ClassifierConfig, ImageInput, ModelService, Prediction, ResNetEncoder,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

type Service = ModelService<ResNetEncoder>;

/// One line of prediction output
#[derive(Debug, Serialize)]
struct PredictionOutput<'a> {
    image: &'a Path,
    #[serde(flatten)]
    prediction: &'a Prediction,
}

#[derive(Debug, Serialize)]
struct ErrorOutput<'a> {
    image: &'a Path,
    error: String,
}

/// Classify a batch of images with the calibrated (or given) threshold
pub async fn predict(
    config: ClassifierConfig,
    images: &[PathBuf],
    threshold: Option<f32>,
    json: bool,
) -> Result<()> {
    check_threshold(threshold)?;
    let service = Arc::new(Service::new(config));

    let bundle = {
        let service = Arc::clone(&service);
        tokio::task::spawn_blocking(move || service.initialize()).await??
    };
    let threshold = threshold.unwrap_or_else(|| bundle.threshold());
    info!("Classifying {} images at threshold {:.3}", images.len(), threshold);

    let mut failures = 0usize;
    for path in images {
        let classifier = Arc::clone(bundle.classifier());
        let owned = path.clone();
        let result = tokio::task::spawn_blocking(move || {
            classifier.predict_with_threshold(ImageInput::Path(&owned), threshold)
        })
        .await?;

        match result {
            Ok(prediction) => print_prediction(path, &prediction, json)?,
            Err(e) => {
                failures += 1;
                print_error(path, &e.to_string(), json)?;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} images could not be classified", failures, images.len());
    }
    Ok(())
}

fn check_threshold(threshold: Option<f32>) -> Result<()> {
    match threshold {
        Some(t) if !t.is_finite() => anyhow::bail!("--threshold must be a finite number, got {}", t),
        _ => Ok(()),
    }
}

/// Build prototypes, calibrate, and print a summary
pub async fn calibrate(config: ClassifierConfig) -> Result<()> {
    let percentile = config.calibration.percentile;
    let service = Arc::new(Service::new(config));

    let bundle = {
        let service = Arc::clone(&service);
        tokio::task::spawn_blocking(move || service.initialize()).await??
    };

    let classifier = bundle.classifier();
    println!("Classes ({}):", classifier.class_names().len());
    for prototype in classifier.prototypes().iter() {
        println!("  {:<32} {:>5} exemplars", prototype.class, prototype.exemplars);
    }

    let calibration = bundle.calibration();
    println!();
    println!(
        "Same-class similarity over {} exemplars: min {:.4}, mean {:.4}, max {:.4}",
        calibration.samples, calibration.min, calibration.mean, calibration.max
    );
    println!(
        "Open-set threshold (p{}): {:.4}",
        percentile, calibration.threshold
    );
    Ok(())
}

/// Read image paths from stdin and print JSON predictions until EOF or Ctrl+C.
///
/// SIGHUP rebuilds prototypes from the exemplar directory. If the model
/// cannot be initialized the loop keeps running and every request retries.
pub async fn watch(config: ClassifierConfig) -> Result<()> {
    let service = Arc::new(Service::new(config));

    {
        let service = Arc::clone(&service);
        match tokio::task::spawn_blocking(move || service.initialize()).await? {
            Ok(bundle) => info!(
                "Model ready with {} classes",
                bundle.classifier().class_names().len()
            ),
            Err(e) => warn!("Starting without a model, will retry on demand: {}", e),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut hangup = hangup_signal()?;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Reading image paths from stdin");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("End of input");
                    break;
                };
                let path = PathBuf::from(line.trim());
                if path.as_os_str().is_empty() {
                    continue;
                }
                classify_one(&service, path).await?;
            }
            _ = hangup.recv() => {
                info!("SIGHUP received, retraining");
                let service = Arc::clone(&service);
                match tokio::task::spawn_blocking(move || service.retrain()).await? {
                    Ok(bundle) => info!("Now serving generation {}", bundle.generation()),
                    Err(e) => error!("Retrain failed: {}", e),
                }
            }
            _ = &mut shutdown => {
                warn!("Shutdown signal received, stopping");
                break;
            }
        }
    }

    Ok(())
}

async fn classify_one(service: &Arc<Service>, path: PathBuf) -> Result<()> {
    let service = Arc::clone(service);
    let (path, result) = tokio::task::spawn_blocking(move || {
        let result = service.predict(ImageInput::Path(&path));
        (path, result)
    })
    .await?;

    match result {
        Ok(prediction) => print_prediction(&path, &prediction, true),
        Err(e @ leafguard_core::Error::Initialization(_)) => {
            print_error(&path, &format!("model unavailable: {}", e.root_cause()), true)
        }
        Err(e) => print_error(&path, &e.to_string(), true),
    }
}

fn print_prediction(path: &Path, prediction: &Prediction, json: bool) -> Result<()> {
    if json {
        let output = PredictionOutput {
            image: path,
            prediction,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "{}\t{}\t{:.4}",
            path.display(),
            prediction.label,
            prediction.score
        );
    }
    Ok(())
}

fn print_error(path: &Path, message: &str, json: bool) -> Result<()> {
    if json {
        let output = ErrorOutput {
            image: path,
            error: message.to_string(),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{}\terror: {}", path.display(), message);
    }
    Ok(())
}

#[cfg(unix)]
struct Hangup(signal::unix::Signal);

#[cfg(unix)]
impl Hangup {
    async fn recv(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

#[cfg(unix)]
fn hangup_signal() -> Result<Hangup> {
    let stream = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    Ok(Hangup(stream))
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    async fn recv(&mut self) -> Option<()> {
        std::future::pending().await
    }
}

#[cfg(not(unix))]
fn hangup_signal() -> Result<Hangup> {
    Ok(Hangup)
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
