//! Convolutional upsampler turning a token sequence into an RGB image.
//!
//! A `(batch, grid_h * grid_w, embed_dim)` sequence is laid out row-major on
//! the `(grid_h, grid_w)` grid, moved to channel-first order and pushed
//! through the stage list, each stage doubling height and width.

use std::{fmt, sync::Arc};

use candle_core::Tensor;
use candle_nn::VarBuilder;
use layers::{builtin, Activation, Conv2d, ConvConfig, NearestUpsample, PrecisionPolicy};

use crate::{
    config::{SpatialDecoderConfig, StageSpec},
    error::{ModelError, Result},
};

/// conv -> activation -> nearest upsample.
pub struct UpsampleStage {
    spec: StageSpec,
    conv: Conv2d,
    activation: Arc<dyn Activation>,
    upsample: NearestUpsample,
}

impl fmt::Debug for UpsampleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpsampleStage")
            .field("spec", &self.spec)
            .finish()
    }
}

impl UpsampleStage {
    pub fn new(spec: StageSpec, vb: VarBuilder) -> Result<Self> {
        let conv_config = ConvConfig {
            in_channels: spec.in_channels,
            out_channels: spec.out_channels,
            kernel_size: spec.kernel_size,
            padding: spec.padding,
            stride: 1,
        };
        Ok(Self {
            spec,
            conv: Conv2d::load(conv_config, vb.pp("conv"))?,
            activation: builtin(spec.activation),
            upsample: NearestUpsample::new(spec.scale_factor)?,
        })
    }

    pub fn spec(&self) -> &StageSpec {
        &self.spec
    }

    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let convolved = self.conv.forward(input, policy)?;
        let activated = self.activation.forward(&convolved, policy)?;
        Ok(self.upsample.forward(&activated)?)
    }
}

#[derive(Debug)]
pub struct SpatialDecoder {
    config: SpatialDecoderConfig,
    policy: PrecisionPolicy,
    stages: Vec<UpsampleStage>,
}

impl SpatialDecoder {
    /// Validates the geometry and builds the stages under `vb.pp("stages.{i}")`.
    pub fn new(config: SpatialDecoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let policy = PrecisionPolicy::from_parameter_dtype(vb.dtype());

        let stages_vb = vb.pp("stages");
        let stages = config
            .stage_specs()
            .into_iter()
            .enumerate()
            .map(|(index, spec)| UpsampleStage::new(spec, stages_vb.pp(index.to_string())))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "spatial decoder init embed_dim={} image={}x{} grid={}x{} stages={} final_activation={:?}",
            config.embed_dim,
            config.img_height,
            config.img_width,
            config.grid_h(),
            config.grid_w(),
            stages.len(),
            config.final_activation
        );

        Ok(Self {
            config,
            policy,
            stages,
        })
    }

    pub fn config(&self) -> &SpatialDecoderConfig {
        &self.config
    }

    /// `(grid_h, grid_w)`.
    pub fn grid(&self) -> (usize, usize) {
        (self.config.grid_h(), self.config.grid_w())
    }

    pub fn num_tokens(&self) -> usize {
        self.config.num_tokens()
    }

    pub fn stage_specs(&self) -> Vec<StageSpec> {
        self.stages.iter().map(|stage| *stage.spec()).collect()
    }

    /// `(batch, grid_h * grid_w, embed_dim)` -> `(batch, 3, img_height, img_width)`.
    pub fn forward(&self, features: &Tensor) -> Result<Tensor> {
        let embed_dim = self.config.embed_dim;
        let (grid_h, grid_w) = self.grid();
        let (batch, num_tokens, channels) = match *features.dims() {
            [b, n, c] => (b, n, c),
            ref dims => {
                return Err(ModelError::shape(
                    "spatial decoder input",
                    format!("expected (batch, num_tokens, {embed_dim}), got {dims:?}"),
                ))
            }
        };
        if channels != embed_dim {
            return Err(ModelError::shape(
                "spatial decoder input",
                format!("expected embed_dim {embed_dim}, got {channels}"),
            ));
        }
        if num_tokens != grid_h * grid_w {
            return Err(ModelError::shape(
                "spatial decoder input",
                format!(
                    "expected {} tokens for a {grid_h}x{grid_w} grid ({}x{} image), got {num_tokens}",
                    grid_h * grid_w,
                    self.config.img_height,
                    self.config.img_width
                ),
            ));
        }

        let mut hidden = features
            .reshape((batch, grid_h, grid_w, embed_dim))?
            .permute((0, 3, 1, 2))?
            .contiguous()?;
        for stage in &self.stages {
            hidden = stage.forward(&hidden, &self.policy)?;
        }

        log::debug!(
            "spatial decoder forward input={:?} output={:?}",
            features.dims(),
            hidden.dims()
        );
        Ok(hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn stages_register_conv_parameters() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let decoder = SpatialDecoder::new(SpatialDecoderConfig::new(4, 16, 8), vb)?;
        assert_eq!(decoder.grid(), (2, 1));
        assert_eq!(decoder.stage_specs().len(), 3);

        let mut names = varmap
            .data()
            .lock()
            .map(|vars| vars.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        assert_eq!(
            names,
            vec![
                "stages.0.conv.bias",
                "stages.0.conv.weight",
                "stages.1.conv.bias",
                "stages.1.conv.weight",
                "stages.2.conv.bias",
                "stages.2.conv.weight",
            ]
        );
        Ok(())
    }

    #[test]
    fn wrong_channel_width_is_rejected() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let decoder = SpatialDecoder::new(SpatialDecoderConfig::new(4, 8, 8), vb)?;
        let features = Tensor::zeros((1, 1, 5), DType::F32, &Device::Cpu)?;
        assert!(matches!(
            decoder.forward(&features),
            Err(ModelError::ShapeMismatch { .. })
        ));
        Ok(())
    }
}
