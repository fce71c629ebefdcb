//! Exact multi-head attention primitives for the sequence decoder.
//!
//! The kernel operates on tensors with layout `[batch, n_heads, seq_len,
//! head_dim]`. Queries and keys may have different sequence lengths, which
//! covers both self-attention (`q_len == k_len`) and cross-attention over an
//! encoded memory. Reductions run in `f32` by default and the output tensor
//! matches the query dtype and layout.
//!
//! Masks are additive `f32` tensors shaped `[batch, 1 | n_heads, q_len,
//! k_len]` holding `0.0` (keep) or `-inf` (discard). The [`masks`] module
//! builds them and normalises caller supplied boolean or additive masks into
//! that layout.
//!
//! Dropout on attention weights is controlled via [`Config::dropout_p`] and
//! should only be set while training.

pub mod core;
pub mod masks;
pub mod reference;

pub use core::{Attention, AttentionError, AttentionPrecision, Config};
pub use reference::ExactAttention;
