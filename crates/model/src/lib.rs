//! Sequence-to-image decoder: a pre-norm transformer decoder over an encoded
//! memory, followed by a convolutional upsampler that lays the decoded tokens
//! out on a `(img_height / 8, img_width / 8)` grid and expands it to an RGB
//! image.

pub mod config;
pub mod error;
pub mod layer;
pub mod mha;
pub mod pipeline;
pub mod sequence;
pub mod spatial;

pub use config::{
    ImageDecoderConfig, SequenceDecoderConfig, SpatialDecoderConfig, StageSpec,
    NUM_UPSAMPLE_STAGES, RGB_CHANNELS, SPATIAL_REDUCTION, STAGE_SCALE,
};
pub use error::{ModelError, Result};
pub use layer::DecoderLayer;
pub use mha::MultiHeadAttention;
pub use pipeline::ImageDecoder;
pub use sequence::{DecoderMasks, SequenceDecoder};
pub use spatial::{SpatialDecoder, UpsampleStage};
