use std::path::PathBuf;

use clap::Parser;

use crate::config::{ConfigError, TrainingConfig};
use crate::training::TrainingPaths;

#[derive(Parser, Debug)]
#[command(
    name = "dermascan-train",
    version,
    about = "Trains the skin lesion classifier and writes its artifacts"
)]
pub struct TrainArgs {
    /// Directory holding `train/` and `test/` splits, one sub-directory per class.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
    /// Where `labels.json` and `skin_cancer_model.mpk` are written.
    #[arg(long, default_value = "model")]
    pub output_dir: PathBuf,
    /// Pretrained backbone record (named MessagePack).
    #[arg(long)]
    pub backbone_weights: Option<PathBuf>,
    /// JSON object merged over the default training configuration.
    #[arg(long, default_value = "{}")]
    pub config: String,
}

impl TrainArgs {
    pub fn training_config(&self) -> Result<TrainingConfig, ConfigError> {
        TrainingConfig::from_overrides(&self.config)
    }

    pub fn paths(&self) -> TrainingPaths {
        TrainingPaths::new(
            self.data_dir.clone(),
            self.output_dir.clone(),
            self.backbone_weights.clone(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_train_args() {
        let args = vec![
            "dermascan-train",
            "--data-dir",
            "/datasets/isic",
            "--config",
            r#"{"batch_size": 16}"#,
        ];
        let train_args = TrainArgs::try_parse_from(args).unwrap();
        assert_eq!(train_args.data_dir, PathBuf::from("/datasets/isic"));
        assert_eq!(train_args.output_dir, PathBuf::from("model"));
        assert_eq!(train_args.backbone_weights, None);
        assert_eq!(train_args.training_config().unwrap().batch_size, 16);
    }

    #[test]
    fn test_default_config_is_empty_override() {
        let train_args = TrainArgs::try_parse_from(["dermascan-train"]).unwrap();
        assert_eq!(train_args.config, "{}");
        assert_eq!(
            train_args.training_config().unwrap(),
            TrainingConfig::default()
        );
    }
}
