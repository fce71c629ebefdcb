//! Builders for causal attention masks.
//!
//! Entries are `0.0` where attention is permitted and `f32::NEG_INFINITY`
//! otherwise.

use candle_core::{Device, Result, Tensor};

/// Construct a `[batch, num_heads, q_len, k_len]` causal mask.
///
/// When `k_len > q_len`, queries are assumed to align with the most recent
/// `q_len` keys, allowing access to the extended prefix.
pub fn build_causal_mask(
    device: &Device,
    batch: usize,
    num_heads: usize,
    q_len: usize,
    k_len: usize,
) -> Result<Tensor> {
    let offset = k_len.saturating_sub(q_len);
    let mut plane = vec![0f32; q_len * k_len];
    for q in 0..q_len {
        for k in (q + offset + 1)..k_len {
            plane[q * k_len + k] = f32::NEG_INFINITY;
        }
    }

    let plane = Tensor::from_vec(plane, (1, 1, q_len, k_len), device)?;
    plane
        .broadcast_as((batch, num_heads, q_len, k_len))?
        .contiguous()
}

/// `(len, len)` mask forbidding each position from attending to later ones.
///
/// This is the usual target mask for autoregressive decoding and is accepted
/// directly as a decoder `tgt_mask`.
pub fn square_subsequent_mask(device: &Device, len: usize) -> Result<Tensor> {
    build_causal_mask(device, 1, 1, len, len)?.reshape((len, len))
}
