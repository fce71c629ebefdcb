//! Sequence decoder followed by the spatial decoder.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::{
    config::ImageDecoderConfig,
    error::{ModelError, Result},
    sequence::{DecoderMasks, SequenceDecoder},
    spatial::SpatialDecoder,
};

#[derive(Debug)]
pub struct ImageDecoder {
    sequence: SequenceDecoder,
    spatial: SpatialDecoder,
}

impl ImageDecoder {
    /// Parameters live under `vb.pp("sequence")` and `vb.pp("spatial")`.
    pub fn new(config: ImageDecoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let sequence = SequenceDecoder::new(config.sequence, vb.pp("sequence"))?;
        let spatial = SpatialDecoder::new(config.spatial, vb.pp("spatial"))?;
        Ok(Self { sequence, spatial })
    }

    pub fn sequence_decoder(&self) -> &SequenceDecoder {
        &self.sequence
    }

    pub fn spatial_decoder(&self) -> &SpatialDecoder {
        &self.spatial
    }

    pub fn set_training(&self, training: bool) {
        self.sequence.set_training(training);
    }

    pub fn is_training(&self) -> bool {
        self.sequence.is_training()
    }

    /// `(batch, tgt_len, embed_dim)` target tokens and memory ->
    /// `(batch, 3, img_height, img_width)`.
    ///
    /// `tgt_len` must equal the spatial token count; this is checked before
    /// any attention work is done.
    pub fn forward(&self, target: &Tensor, memory: &Tensor, masks: &DecoderMasks) -> Result<Tensor> {
        let expected = self.spatial.num_tokens();
        match *target.dims() {
            [_, tgt_len, _] if tgt_len != expected => {
                let (grid_h, grid_w) = self.spatial.grid();
                return Err(ModelError::shape(
                    "image decoder target",
                    format!(
                        "tgt_len {tgt_len} does not match the {grid_h}x{grid_w} grid ({expected} tokens)"
                    ),
                ));
            }
            _ => {}
        }
        let features = self.sequence.forward(target, memory, masks)?;
        self.spatial.forward(&features)
    }
}
