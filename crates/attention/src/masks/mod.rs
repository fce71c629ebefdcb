//! Mask utilities shared by attention implementations.
//!
//! Masks consumed by the kernel are additive tensors with dtype `f32`, shaped
//! `[batch, num_heads, q_len, k_len]`. Values are either `0.0` (keep) or
//! `f32::NEG_INFINITY` (discard) to align with Candle's softmax-friendly
//! masking behaviour.
//!
//! Caller supplied masks may instead be boolean (any integer dtype, non-zero
//! meaning "blocked") or additive floats, in 2D `(q_len, k_len)` or 3D
//! `(batch * num_heads, q_len, k_len)` form for attention masks and
//! `(batch, k_len)` form for key padding masks; [`expand_attention_mask`]
//! and [`expand_key_padding_mask`] normalise them.

pub mod causal;
pub mod expand;
pub mod padding;

use candle_core::DType;

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use causal::{build_causal_mask, square_subsequent_mask};
pub use expand::{expand_attention_mask, expand_key_padding_mask, merge_masks};
pub use padding::{padding_mask_from_booleans, padding_mask_from_lengths};
