//! Normalisation of caller supplied masks into the kernel layout.
//!
//! Boolean masks are integer tensors where a non-zero entry blocks attention;
//! they become `-inf`/`0.0`. Floating masks are taken as additive and cast to
//! [`MASK_DTYPE`]. The result is always `[batch, num_heads, q_len, k_len]`.

use candle_core::{DType, Tensor};

use super::MASK_DTYPE;
use crate::core::AttentionError;

/// Expands an attention mask shaped `(q_len, k_len)` or
/// `(batch * num_heads, q_len, k_len)`.
///
/// The leading axis of the 3D form is batch-major: entry `b * num_heads + h`
/// belongs to batch element `b`, head `h`.
pub fn expand_attention_mask(
    mask: &Tensor,
    batch: usize,
    num_heads: usize,
    q_len: usize,
    k_len: usize,
) -> Result<Tensor, AttentionError> {
    let additive = to_additive(mask, "attention mask")?;
    let expanded = match *additive.dims() {
        [mq, mk] if mq == q_len && mk == k_len => additive
            .reshape((1, 1, q_len, k_len))?
            .broadcast_as((batch, num_heads, q_len, k_len))?
            .contiguous()?,
        [bh, mq, mk] if bh == batch * num_heads && mq == q_len && mk == k_len => {
            additive.reshape((batch, num_heads, q_len, k_len))?
        }
        ref dims => {
            return Err(AttentionError::shape(format!(
                "attention mask must be ({q_len}, {k_len}) or ({}, {q_len}, {k_len}), got {dims:?}",
                batch * num_heads
            )))
        }
    };
    Ok(expanded)
}

/// Expands a key padding mask shaped `(batch, k_len)`.
pub fn expand_key_padding_mask(
    mask: &Tensor,
    batch: usize,
    num_heads: usize,
    q_len: usize,
    k_len: usize,
) -> Result<Tensor, AttentionError> {
    let additive = to_additive(mask, "key padding mask")?;
    match *additive.dims() {
        [mb, mk] if mb == batch && mk == k_len => Ok(additive
            .reshape((batch, 1, 1, k_len))?
            .broadcast_as((batch, num_heads, q_len, k_len))?
            .contiguous()?),
        ref dims => Err(AttentionError::shape(format!(
            "key padding mask must be ({batch}, {k_len}), got {dims:?}"
        ))),
    }
}

/// Sums two optional additive masks of identical shape.
pub fn merge_masks(
    first: Option<Tensor>,
    second: Option<Tensor>,
) -> Result<Option<Tensor>, AttentionError> {
    match (first, second) {
        (Some(a), Some(b)) => {
            if a.dims() != b.dims() {
                return Err(AttentionError::shape(format!(
                    "cannot merge masks shaped {:?} and {:?}",
                    a.dims(),
                    b.dims()
                )));
            }
            Ok(Some(a.add(&b)?))
        }
        (Some(mask), None) | (None, Some(mask)) => Ok(Some(mask)),
        (None, None) => Ok(None),
    }
}

fn to_additive(mask: &Tensor, name: &str) -> Result<Tensor, AttentionError> {
    match mask.dtype() {
        DType::U8 | DType::U32 | DType::I64 => {
            let blocked = mask.ne(&mask.zeros_like()?)?;
            let discard = Tensor::full(f32::NEG_INFINITY, mask.dims(), mask.device())?;
            let keep = Tensor::zeros(mask.dims(), MASK_DTYPE, mask.device())?;
            Ok(blocked.where_cond(&discard, &keep)?)
        }
        DType::F16 | DType::BF16 | DType::F32 | DType::F64 => Ok(mask.to_dtype(MASK_DTYPE)?),
        other => Err(AttentionError::UnsupportedDType {
            requested: format!("{name} dtype {other:?}"),
        }),
    }
}
