//! Builders for padding masks used to drop padded keys.
//!
//! Outputs share the dtype and `[batch, num_heads, q_len, k_len]` layout
//! described in [`super::MASK_DTYPE`].

use candle_core::{Device, Error, Result, Tensor};

/// Construct padding masks from per-batch valid key lengths.
pub fn padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    num_heads: usize,
    q_len: usize,
    k_len: usize,
) -> Result<Tensor> {
    let rows = key_lengths
        .iter()
        .map(|&valid| (0..k_len).map(|k| k >= valid).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    build_from_rows(device, &rows, num_heads, q_len, k_len)
}

/// Construct padding masks from boolean padding indicators.
///
/// Each inner slice corresponds to a batch element and must share the same
/// length. `true` indicates a padded (masked) key position.
pub fn padding_mask_from_booleans(
    device: &Device,
    padding: &[Vec<bool>],
    num_heads: usize,
    q_len: usize,
) -> Result<Tensor> {
    let k_len = padding.first().map(Vec::len).unwrap_or(0);
    if let Some(row) = padding.iter().position(|row| row.len() != k_len) {
        return Err(Error::Msg(format!(
            "boolean padding rows must share k_len {k_len}, row {row} has {}",
            padding[row].len()
        )));
    }
    build_from_rows(device, padding, num_heads, q_len, k_len)
}

fn build_from_rows(
    device: &Device,
    rows: &[Vec<bool>],
    num_heads: usize,
    q_len: usize,
    k_len: usize,
) -> Result<Tensor> {
    let batch = rows.len();
    let data = rows
        .iter()
        .flat_map(|row| {
            row.iter()
                .map(|&padded| if padded { f32::NEG_INFINITY } else { 0.0 })
        })
        .collect::<Vec<_>>();
    let keys = Tensor::from_vec(data, (batch, 1, 1, k_len), device)?;
    keys.broadcast_as((batch, num_heads, q_len, k_len))?
        .contiguous()
}
