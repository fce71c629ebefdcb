//! 2D convolutions over channel-first feature maps.
//!
//! Inputs are `(batch, in_channels, height, width)`; outputs are
//! `(batch, out_channels, out_height, out_width)`. With [`ConvConfig::same`]
//! an odd kernel is padded by `kernel_size / 2`, so the spatial size is
//! preserved. The convolution runs in the compute dtype of the
//! [`PrecisionPolicy`] and the result is cast back to storage.

use candle_core::{Error, Result, Tensor};
use candle_nn::VarBuilder;

use crate::{checks, dtypes::PrecisionPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub padding: usize,
    pub stride: usize,
}

impl ConvConfig {
    /// Stride-1 convolution whose zero padding keeps height and width unchanged.
    pub fn same(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            padding: kernel_size / 2,
            stride: 1,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(Error::Msg(format!(
                "conv2d channels must be non-zero, got {} -> {}",
                self.in_channels, self.out_channels
            )));
        }
        if self.kernel_size == 0 || self.stride == 0 {
            return Err(Error::Msg(format!(
                "conv2d kernel_size and stride must be non-zero, got {self:?}"
            )));
        }
        Ok(())
    }

    /// Spatial size produced for an `(height, width)` input.
    pub fn output_hw(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        let out = |size: usize| {
            (size + 2 * self.padding)
                .checked_sub(self.kernel_size)
                .map(|span| span / self.stride + 1)
        };
        Some((out(height)?, out(width)?))
    }
}

/// Convolution with bias over `(batch, channels, height, width)` maps.
#[derive(Debug, Clone)]
pub struct Conv2d {
    config: ConvConfig,
    weight: Tensor,
    bias: Tensor,
}

impl Conv2d {
    /// Constructs a convolution from existing parameters.
    ///
    /// `weight` is `(out_channels, in_channels, kernel, kernel)`, `bias` is
    /// `(out_channels,)`.
    pub fn new(config: ConvConfig, weight: Tensor, bias: Tensor) -> Result<Self> {
        config.validate()?;
        checks::expect_shape(
            "conv2d.weight",
            &weight,
            &[
                config.out_channels,
                config.in_channels,
                config.kernel_size,
                config.kernel_size,
            ],
        )?;
        checks::expect_shape("conv2d.bias", &bias, &[config.out_channels])?;
        checks::expect_dtype_in("conv2d.weight", &weight, checks::FLOAT_DTYPES)?;
        checks::expect_same_dtype("conv2d.bias", &bias, "conv2d.weight", &weight)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Fetches (or creates) `weight` and `bias` under `vb` using candle's
    /// standard convolution initialisation.
    pub fn load(config: ConvConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let cfg = candle_nn::Conv2dConfig {
            padding: config.padding,
            stride: config.stride,
            ..Default::default()
        };
        let conv = candle_nn::conv2d(
            config.in_channels,
            config.out_channels,
            config.kernel_size,
            cfg,
            vb,
        )?;
        let bias = conv
            .bias()
            .cloned()
            .ok_or_else(|| Error::Msg("conv2d was created without a bias".into()))?;
        Self::new(config, conv.weight().clone(), bias)
    }

    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_channels_first("conv2d.input", input, self.config.in_channels)?;

        let input = policy.cast_for_matmul(input)?.contiguous()?;
        let weight = policy.cast_for_matmul(&self.weight)?;
        let bias = policy
            .cast_for_matmul(&self.bias)?
            .reshape((1, self.config.out_channels, 1, 1))?;

        let output = input
            .conv2d(&weight, self.config.padding, self.config.stride, 1, 1)?
            .broadcast_add(&bias)?;
        policy.cast_to_storage(&output)
    }
}
