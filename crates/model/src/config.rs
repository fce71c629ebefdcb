//! Construction-time configuration for the decoder pipeline.
//!
//! Every field has a serde default so partial JSON/TOML files are accepted;
//! [`ImageDecoderConfig::from_path`] picks the format from the extension and
//! validates the result.

use std::{fs, path::Path};

use layers::ActivationKind;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Number of conv + upsample stages in the spatial decoder.
pub const NUM_UPSAMPLE_STAGES: usize = 3;
/// Spatial expansion applied by each stage.
pub const STAGE_SCALE: usize = 2;
/// Total expansion from token grid to image, `STAGE_SCALE ^ NUM_UPSAMPLE_STAGES`.
pub const SPATIAL_REDUCTION: usize = 8;
/// Channels of the reconstructed image.
pub const RGB_CHANNELS: usize = 3;
/// Kernel size shared by every spatial stage.
pub const STAGE_KERNEL: usize = 3;

/// Hyperparameters of the attention stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceDecoderConfig {
    pub embed_dim: usize,
    pub num_heads: usize,
    pub feedforward_dim: usize,
    pub dropout_rate: f32,
    pub num_layers: usize,
    /// Feed-forward activation, `relu` or `gelu`.
    pub activation: ActivationKind,
    pub layer_norm_eps: f64,
    /// Append a layer norm after the last decoder layer.
    pub final_norm: bool,
}

impl Default for SequenceDecoderConfig {
    fn default() -> Self {
        Self {
            embed_dim: 512,
            num_heads: 8,
            feedforward_dim: 2048,
            dropout_rate: 0.1,
            num_layers: 6,
            activation: ActivationKind::Relu,
            layer_norm_eps: 1e-5,
            final_norm: false,
        }
    }
}

impl SequenceDecoderConfig {
    pub fn new(
        embed_dim: usize,
        num_heads: usize,
        feedforward_dim: usize,
        dropout_rate: f32,
        num_layers: usize,
    ) -> Self {
        Self {
            embed_dim,
            num_heads,
            feedforward_dim,
            dropout_rate,
            num_layers,
            ..Self::default()
        }
    }

    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.embed_dim == 0 {
            errors.push("sequence.embed_dim must be greater than 0".to_string());
        }
        if self.num_heads == 0 {
            errors.push("sequence.num_heads must be greater than 0".to_string());
        } else if self.embed_dim % self.num_heads != 0 {
            errors.push(format!(
                "sequence.embed_dim ({}) must be divisible by num_heads ({})",
                self.embed_dim, self.num_heads
            ));
        }
        if self.feedforward_dim == 0 {
            errors.push("sequence.feedforward_dim must be greater than 0".to_string());
        }
        if self.num_layers == 0 {
            errors.push("sequence.num_layers must be greater than 0".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            errors.push(format!(
                "sequence.dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            ));
        }
        if !matches!(self.activation, ActivationKind::Relu | ActivationKind::Gelu) {
            errors.push(format!(
                "sequence.activation must be relu or gelu, got {:?}",
                self.activation
            ));
        }
        if !self.layer_norm_eps.is_finite() || self.layer_norm_eps <= 0.0 {
            errors.push(format!(
                "sequence.layer_norm_eps must be positive, got {}",
                self.layer_norm_eps
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::validation(errors))
        }
    }
}

/// One conv3x3 -> activation -> nearest upsample stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub padding: usize,
    pub activation: ActivationKind,
    pub scale_factor: usize,
}

/// Target image geometry for the convolutional upsampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialDecoderConfig {
    pub embed_dim: usize,
    pub img_height: usize,
    pub img_width: usize,
    /// Activation of the RGB stage; `relu` keeps pixels non-negative.
    pub final_activation: ActivationKind,
}

impl Default for SpatialDecoderConfig {
    fn default() -> Self {
        Self {
            embed_dim: 512,
            img_height: 256,
            img_width: 256,
            final_activation: ActivationKind::Relu,
        }
    }
}

impl SpatialDecoderConfig {
    pub fn new(embed_dim: usize, img_height: usize, img_width: usize) -> Self {
        Self {
            embed_dim,
            img_height,
            img_width,
            final_activation: ActivationKind::Relu,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.embed_dim == 0 {
            errors.push("spatial.embed_dim must be greater than 0".to_string());
        }
        for (name, value) in [("img_height", self.img_height), ("img_width", self.img_width)] {
            if value == 0 {
                errors.push(format!("spatial.{name} must be greater than 0"));
            } else if value % SPATIAL_REDUCTION != 0 {
                errors.push(format!(
                    "spatial.{name} ({value}) must be divisible by {SPATIAL_REDUCTION}"
                ));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::validation(errors))
        }
    }

    pub fn grid_h(&self) -> usize {
        self.img_height / SPATIAL_REDUCTION
    }

    pub fn grid_w(&self) -> usize {
        self.img_width / SPATIAL_REDUCTION
    }

    /// Sequence length the spatial decoder accepts.
    pub fn num_tokens(&self) -> usize {
        self.grid_h() * self.grid_w()
    }

    /// Ordered stage schedule: two `embed_dim -> embed_dim` stages with ReLU,
    /// then `embed_dim -> 3` with `final_activation`.
    pub fn stage_specs(&self) -> Vec<StageSpec> {
        (0..NUM_UPSAMPLE_STAGES)
            .map(|stage| {
                let last = stage + 1 == NUM_UPSAMPLE_STAGES;
                StageSpec {
                    in_channels: self.embed_dim,
                    out_channels: if last { RGB_CHANNELS } else { self.embed_dim },
                    kernel_size: STAGE_KERNEL,
                    padding: STAGE_KERNEL / 2,
                    activation: if last {
                        self.final_activation
                    } else {
                        ActivationKind::Relu
                    },
                    scale_factor: STAGE_SCALE,
                }
            })
            .collect()
    }
}

/// Full sequence-to-image pipeline configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageDecoderConfig {
    pub sequence: SequenceDecoderConfig,
    pub spatial: SpatialDecoderConfig,
}

impl ImageDecoderConfig {
    /// Loads a `.json` or `.toml` file and validates it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: ImageDecoderConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") => toml::from_str(&contents)?,
            other => {
                return Err(ModelError::configuration(format!(
                    "unsupported configuration extension {other:?} for {}",
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sequence.validate()?;
        self.spatial.validate()?;
        if self.sequence.embed_dim != self.spatial.embed_dim {
            return Err(ModelError::configuration(format!(
                "sequence.embed_dim ({}) must equal spatial.embed_dim ({})",
                self.sequence.embed_dim, self.spatial.embed_dim
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_hyperparameters() -> Result<()> {
        let config = SequenceDecoderConfig::default();
        assert_eq!(
            (config.embed_dim, config.num_heads, config.feedforward_dim, config.num_layers),
            (512, 8, 2048, 6)
        );
        assert_eq!(config.head_dim(), 64);
        config.validate()
    }

    #[test]
    fn indivisible_heads_are_rejected() {
        let config = SequenceDecoderConfig::new(30, 4, 64, 0.0, 1);
        assert!(matches!(config.validate(), Err(ModelError::Configuration(_))));
    }

    #[test]
    fn dropout_must_be_a_probability() {
        let config = SequenceDecoderConfig::new(32, 4, 64, 1.0, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn grid_follows_image_size() -> Result<()> {
        let config = SpatialDecoderConfig::new(512, 256, 128);
        config.validate()?;
        assert_eq!((config.grid_h(), config.grid_w()), (32, 16));
        assert_eq!(config.num_tokens(), 512);
        Ok(())
    }

    #[test]
    fn image_sizes_must_be_divisible_by_eight() {
        let err = SpatialDecoderConfig::new(512, 100, 256)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("img_height (100)"));
        assert!(SpatialDecoderConfig::new(512, 256, 0).validate().is_err());
    }

    #[test]
    fn stage_schedule_ends_in_rgb() {
        let mut config = SpatialDecoderConfig::new(16, 64, 64);
        config.final_activation = ActivationKind::Identity;
        let specs = config.stage_specs();
        assert_eq!(specs.len(), NUM_UPSAMPLE_STAGES);
        assert_eq!(specs[0].in_channels, 16);
        assert_eq!(specs[1].out_channels, 16);
        assert_eq!(specs[2].out_channels, RGB_CHANNELS);
        assert_eq!(specs[1].activation, ActivationKind::Relu);
        assert_eq!(specs[2].activation, ActivationKind::Identity);
        assert!(specs.iter().all(|s| s.kernel_size == 3 && s.padding == 1));
        assert_eq!(
            specs.iter().map(|s| s.scale_factor).product::<usize>(),
            SPATIAL_REDUCTION
        );
    }

    #[test]
    fn pipeline_requires_matching_embed_dim() {
        let config = ImageDecoderConfig {
            sequence: SequenceDecoderConfig::new(64, 4, 128, 0.1, 2),
            spatial: SpatialDecoderConfig::new(32, 64, 64),
        };
        assert!(matches!(config.validate(), Err(ModelError::Configuration(_))));
    }

    #[test]
    fn partial_toml_uses_defaults() -> std::result::Result<(), toml::de::Error> {
        let config: ImageDecoderConfig = toml::from_str(
            r#"
            [sequence]
            embed_dim = 64
            activation = "gelu"

            [spatial]
            img_height = 32
            "#,
        )?;
        assert_eq!(config.sequence.embed_dim, 64);
        assert_eq!(config.sequence.num_heads, 8);
        assert_eq!(config.sequence.activation, ActivationKind::Gelu);
        assert_eq!(config.spatial.img_height, 32);
        assert_eq!(config.spatial.img_width, 256);
        Ok(())
    }
}
