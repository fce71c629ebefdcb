//! Core traits and types shared across attention implementations.
//!
//! Implementations operate on tensors with layout
//! `[batch, n_heads, seq_len, head_dim]`; the output mirrors the query layout.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{AttentionPrecision, Config, PRECISION_ENV};
pub use errors::AttentionError;

/// Unified interface for attention kernels.
///
/// * `q` is `[batch, n_heads, q_len, head_dim]`, `k` and `v` are
///   `[batch, n_heads, k_len, head_dim]`.
/// * The returned tensor mirrors the layout and dtype of `q`.
/// * Masks, when present, must be shaped `[batch, 1 or n_heads, q_len, k_len]`.
/// * Dropout is controlled via [`Config::dropout_p`].
pub trait Attention: Send + Sync {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Tensor, AttentionError>;
}
