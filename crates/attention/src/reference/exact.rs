//! Reference CPU/GPU attention kernel.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait.

use std::sync::OnceLock;

use candle_core::{DType, Device, Tensor};
use candle_nn::ops::{dropout, softmax_last_dim};

use crate::core::{Attention, AttentionError, AttentionPrecision, Config};

/// Numerically stable, portable attention kernel.
#[derive(Debug, Default)]
pub struct ExactAttention {
    first_call: OnceLock<()>,
}

impl ExactAttention {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init precision={:?} dropout={:?} dtype={:?}",
                config.precision,
                config.dropout_p,
                q.dtype()
            );
        }

        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::shape(
                "q, k, v must reside on the same device",
            ));
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::shape("q, k, v must share the same dtype"));
        }
        if !dtype.is_float() {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let (batch, heads, q_len, head_dim) = q
            .dims4()
            .map_err(|_| AttentionError::shape("q must have shape [batch, heads, q_len, head_dim]"))?;
        let (kb, kh, k_len, kd) = k
            .dims4()
            .map_err(|_| AttentionError::shape("k must have shape [batch, heads, k_len, head_dim]"))?;
        let (vb, vh, vk, vd) = v
            .dims4()
            .map_err(|_| AttentionError::shape("v must have shape [batch, heads, k_len, head_dim]"))?;

        if kb != batch || kh != heads || kd != head_dim {
            return Err(AttentionError::shape(format!(
                "k shape mismatch: expected [{batch}, {heads}, ?, {head_dim}] got [{kb}, {kh}, {k_len}, {kd}]"
            )));
        }
        if vb != batch || vh != heads || vk != k_len || vd != head_dim {
            return Err(AttentionError::shape(format!(
                "v shape mismatch: expected [{batch}, {heads}, {k_len}, {head_dim}] got [{vb}, {vh}, {vk}, {vd}]"
            )));
        }

        let work_dtype = working_dtype(config.precision, dtype, device);
        let q_work = q.to_dtype(work_dtype)?.contiguous()?;
        let k_work = k.to_dtype(work_dtype)?.contiguous()?;
        let v_work = v.to_dtype(work_dtype)?.contiguous()?;

        let merged = batch * heads;
        let q_view = q_work.reshape((merged, q_len, head_dim))?;
        let k_t = k_work.reshape((merged, k_len, head_dim))?.t()?;
        let scale = 1.0 / (head_dim as f64).sqrt();
        let mut scores = q_view
            .matmul(&k_t)?
            .affine(scale, 0.0)?
            .reshape((batch, heads, q_len, k_len))?;

        if let Some(mask) = mask {
            if !device.same_device(mask.device()) {
                return Err(AttentionError::shape(
                    "mask must reside on the same device as q",
                ));
            }
            if !mask.dtype().is_float() {
                return Err(AttentionError::UnsupportedDType {
                    requested: format!("additive mask with dtype {:?}", mask.dtype()),
                });
            }
            let (mb, mh, mq, mk) = mask.dims4().map_err(|_| {
                AttentionError::shape("mask must have shape [batch, heads|1, q_len, k_len]")
            })?;
            if mb != batch || mq != q_len || mk != k_len {
                return Err(AttentionError::shape(format!(
                    "mask shape mismatch: expected [{batch}, 1|{heads}, {q_len}, {k_len}] got [{mb}, {mh}, {mq}, {mk}]"
                )));
            }
            if mh != 1 && mh != heads {
                return Err(AttentionError::shape(format!(
                    "mask head dimension must be 1 or {heads}, got {mh}"
                )));
            }
            let mask = mask.to_dtype(scores.dtype())?;
            scores = scores.broadcast_add(&mask)?;
        }

        let probs = softmax_last_dim(&scores.reshape((merged, q_len, k_len))?)?;

        let probs = match config.dropout_p {
            Some(p) if !(0.0..1.0).contains(&p) => {
                return Err(AttentionError::shape(format!(
                    "dropout probability must be in [0, 1), got {p}"
                )))
            }
            Some(p) if p > 0.0 => dropout(&probs, p)?,
            _ => probs,
        };

        let v_view = v_work.reshape((merged, k_len, head_dim))?;
        let output = probs
            .matmul(&v_view)?
            .reshape((batch, heads, q_len, head_dim))?;
        Ok(output.to_dtype(dtype)?)
    }
}

/// Dtype the score matmul, softmax and value aggregation run in.
///
/// The CPU backend has no half-precision matmul, so `Inherit` falls back to
/// `f32` there.
fn working_dtype(precision: AttentionPrecision, dtype: DType, device: &Device) -> DType {
    match precision {
        AttentionPrecision::ForceF32 if dtype == DType::F64 => DType::F64,
        AttentionPrecision::ForceF32 => DType::F32,
        AttentionPrecision::Inherit => {
            let half = matches!(dtype, DType::F16 | DType::BF16);
            if half && device.is_cpu() {
                DType::F32
            } else {
                dtype
            }
        }
    }
}
