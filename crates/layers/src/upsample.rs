//! Nearest-neighbour spatial upsampling for channel-first feature maps.

use candle_core::{Error, Result, Tensor};

/// Repeats every pixel into a `scale_factor x scale_factor` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NearestUpsample {
    scale_factor: usize,
}

impl NearestUpsample {
    pub fn new(scale_factor: usize) -> Result<Self> {
        if scale_factor == 0 {
            return Err(Error::Msg("upsample scale_factor must be non-zero".into()));
        }
        Ok(Self { scale_factor })
    }

    pub fn scale_factor(&self) -> usize {
        self.scale_factor
    }

    pub fn output_hw(&self, height: usize, width: usize) -> (usize, usize) {
        (height * self.scale_factor, width * self.scale_factor)
    }

    /// `(batch, channels, h, w)` -> `(batch, channels, h * s, w * s)`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let (_, _, height, width) = input.dims4()?;
        if self.scale_factor == 1 {
            return Ok(input.clone());
        }
        let (out_h, out_w) = self.output_hw(height, width);
        input.upsample_nearest2d(out_h, out_w)
    }
}
