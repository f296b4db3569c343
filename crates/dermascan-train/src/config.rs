use dermascan_model::{BackboneConfig, ClassifierConfig};
use json_patch::merge;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Serialization(serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn is_syntax(&self) -> bool {
        matches!(self, ConfigError::Serialization(e) if e.is_syntax())
    }

    pub fn is_data(&self) -> bool {
        matches!(self, ConfigError::Serialization(e) if e.is_data())
    }
}

/// Applies `overrides` (a JSON merge patch) on top of `T::default()`.
pub fn deserialize_and_merge_with_default<T>(overrides: &str) -> Result<T, ConfigError>
where
    T: Serialize + for<'de> Deserialize<'de> + Default,
{
    let override_val: serde_json::Value =
        serde_json::from_str(overrides).map_err(ConfigError::Serialization)?;

    let mut merged = serde_json::to_value(T::default()).map_err(ConfigError::Serialization)?;

    merge(&mut merged, &override_val);

    serde_json::from_value(merged).map_err(ConfigError::Serialization)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PhaseConfig {
    pub epochs: usize,
    pub learning_rate: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AugmentationConfig {
    pub enabled: bool,
    pub horizontal_flip: bool,
    /// Largest rotation either way, as a fraction of a full turn.
    pub max_rotation: f32,
    /// Largest fraction of each side removed or added by the random zoom.
    pub max_zoom: f32,
    /// Largest relative change applied by the random contrast.
    pub max_contrast: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizontal_flip: true,
            max_rotation: 0.1,
            max_zoom: 0.1,
            max_contrast: 0.1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub seed: u64,
    /// Head-only phase; the backbone stays frozen.
    pub warmup: PhaseConfig,
    /// Head plus the last `unfreeze_blocks` backbone blocks.
    pub fine_tune: PhaseConfig,
    pub unfreeze_blocks: usize,
    pub hidden_size: usize,
    pub dropout: f64,
    pub backbone_channels: Vec<usize>,
    pub augmentation: AugmentationConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            seed: 42,
            warmup: PhaseConfig {
                epochs: 5,
                learning_rate: 1e-3,
            },
            fine_tune: PhaseConfig {
                epochs: 8,
                learning_rate: 1e-5,
            },
            unfreeze_blocks: 2,
            hidden_size: 256,
            dropout: 0.5,
            backbone_channels: BackboneConfig::new().channels,
            augmentation: AugmentationConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn from_overrides(overrides: &str) -> Result<Self, ConfigError> {
        let config: Self = deserialize_and_merge_with_default(overrides)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1".to_string());
        }
        if self.backbone_channels.is_empty() {
            return invalid("backbone_channels must name at least one block".to_string());
        }
        if self.unfreeze_blocks > self.backbone_channels.len() {
            return invalid(format!(
                "unfreeze_blocks is {} but the backbone only has {} blocks",
                self.unfreeze_blocks,
                self.backbone_channels.len()
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return invalid(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        for (name, phase) in [("warmup", &self.warmup), ("fine_tune", &self.fine_tune)] {
            if !(phase.learning_rate.is_finite() && phase.learning_rate > 0.0) {
                return invalid(format!(
                    "{name}.learning_rate must be positive, got {}",
                    phase.learning_rate
                ));
            }
        }
        let augmentation = &self.augmentation;
        if !(0.0..=0.5).contains(&augmentation.max_rotation) {
            return invalid(format!(
                "augmentation.max_rotation must be in [0, 0.5], got {}",
                augmentation.max_rotation
            ));
        }
        if !(0.0..1.0).contains(&augmentation.max_zoom) {
            return invalid(format!(
                "augmentation.max_zoom must be in [0, 1), got {}",
                augmentation.max_zoom
            ));
        }
        if !(0.0..1.0).contains(&augmentation.max_contrast) {
            return invalid(format!(
                "augmentation.max_contrast must be in [0, 1), got {}",
                augmentation.max_contrast
            ));
        }
        Ok(())
    }

    /// Architecture of the classifier trained for `num_classes` classes.
    pub fn classifier(&self, num_classes: usize) -> ClassifierConfig {
        ClassifierConfig::new(num_classes)
            .with_hidden_size(self.hidden_size)
            .with_dropout(self.dropout)
            .with_backbone(BackboneConfig::new().with_channels(self.backbone_channels.clone()))
    }
}
