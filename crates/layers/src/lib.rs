//! Building blocks shared by the sequence and spatial decoders.
//!
//! Sequence components consume `(batch, seq, hidden)` tensors; spatial
//! components consume channel-first `(batch, channels, height, width)` maps.
//! Everything here returns `candle_core::Result` and follows the mixed
//! precision rules captured by [`PrecisionPolicy`].

pub mod activations;
pub mod checks;
pub mod conv;
pub mod dropout;
pub mod dtypes;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod residual;
pub mod upsample;

pub use activations::{builtin, Activation, ActivationKind};
pub use conv::{Conv2d, ConvConfig};
pub use dropout::Dropout;
pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit, LinearLayer};
pub use mlp::{FeedForward, FeedForwardConfig, FeedForwardLayer};
pub use norm::{LayerNorm, NormConfig, NormalizationLayer};
pub use residual::{Residual, ResidualConfig};
pub use upsample::NearestUpsample;
