//! CLI configuration: YAML file with flag and environment overrides

use crate::Cli;
use leafguard_classifiers::ClassifierConfig;

/// Load the classifier configuration from file (or defaults) and apply CLI overrides
pub fn load(cli: &Cli) -> anyhow::Result<ClassifierConfig> {
    let mut config = if cli.config.exists() {
        ClassifierConfig::from_file(&cli.config)?
    } else {
        tracing::debug!(
            "No config at {}, using defaults",
            cli.config.display()
        );
        ClassifierConfig::default()
    };

    if let Some(encoder) = &cli.encoder {
        config = config.with_encoder_path(encoder);
    }

    if let Some(dir) = &cli.exemplar_dir {
        config = config.with_exemplar_dir(dir);
    }

    if let Some(device) = cli.device {
        config = config.with_device(device);
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use leafguard_classifiers::{DeviceType, ModelSourceSpec};
    use std::path::{Path, PathBuf};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("leafguard").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cli = parse(&["--config", "/nonexistent/leafguard.yaml", "calibrate"]);
        let config = load(&cli).unwrap();
        assert_eq!(config.exemplar_dir, PathBuf::from("data/fewshot/train"));
        assert_eq!(config.device, DeviceType::Cpu);
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leafguard.yaml");
        std::fs::write(
            &path,
            "exemplar_dir: ./from-file\ndevice: cpu\ncalibration:\n  percentile: 10.0\n",
        )
        .unwrap();

        let cli = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--exemplar-dir",
            "/data/train",
            "--encoder",
            "/models/encoder.safetensors",
            "--device",
            "cuda:1",
            "predict",
            "leaf.jpg",
        ]);
        let config = load(&cli).unwrap();

        assert_eq!(config.exemplar_dir, PathBuf::from("/data/train"));
        assert_eq!(config.device, DeviceType::Cuda(1));
        assert_eq!(config.calibration.percentile, 10.0);
        assert!(matches!(
            config.encoder.source,
            ModelSourceSpec::Local { ref path } if path == Path::new("/models/encoder.safetensors")
        ));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leafguard.yaml");
        std::fs::write(&path, "batch_size: 0\n").unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "calibrate"]);
        assert!(load(&cli).is_err());
    }

    #[test]
    fn test_unknown_device_flag_is_rejected() {
        let result = Cli::try_parse_from(["leafguard", "--device", "tpu", "calibrate"]);
        assert!(result.is_err());
    }
}
