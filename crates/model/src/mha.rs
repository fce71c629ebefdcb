//! Multi-head attention with separate query and fused key/value projections.
//!
//! Self-attention passes the same tensor as `query` and `key_value`;
//! cross-attention passes the encoder memory as `key_value`. Masks reaching
//! this layer are already additive `[batch, heads, q_len, k_len]` tensors.

use std::fmt;

use attention::{Attention, Config as AttentionConfig, ExactAttention};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use layers::{checks, Linear, LinearConfig, LinearInit, LinearLayer, PrecisionPolicy};

use crate::error::{ModelError, Result};

pub struct MultiHeadAttention {
    embed_dim: usize,
    num_heads: usize,
    head_dim: usize,
    dropout_p: f32,
    policy: PrecisionPolicy,
    q_proj: Linear,
    kv_proj: Linear,
    out_proj: Linear,
    attention: ExactAttention,
    attention_config: AttentionConfig,
}

impl fmt::Debug for MultiHeadAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiHeadAttention")
            .field("embed_dim", &self.embed_dim)
            .field("num_heads", &self.num_heads)
            .field("head_dim", &self.head_dim)
            .field("dropout_p", &self.dropout_p)
            .finish()
    }
}

impl MultiHeadAttention {
    /// Creates `q_proj`, `kv_proj` and `out_proj` under `vb`.
    pub fn new(embed_dim: usize, num_heads: usize, dropout_p: f32, vb: VarBuilder) -> Result<Self> {
        if num_heads == 0 || embed_dim % num_heads != 0 {
            return Err(ModelError::configuration(format!(
                "embed_dim ({embed_dim}) must be divisible by num_heads ({num_heads})"
            )));
        }
        let policy = PrecisionPolicy::from_parameter_dtype(vb.dtype());

        let q_proj = Linear::load(
            LinearConfig::new(embed_dim, embed_dim),
            &LinearInit::XavierUniform,
            vb.pp("q_proj"),
        )?;
        let mut kv_config = LinearConfig::new(embed_dim, embed_dim);
        kv_config.fused_projections = 2;
        let kv_proj = Linear::load(kv_config, &LinearInit::XavierUniform, vb.pp("kv_proj"))?;
        let out_proj = Linear::load(
            LinearConfig::new(embed_dim, embed_dim),
            &LinearInit::dense_default(),
            vb.pp("out_proj"),
        )?;

        Ok(Self {
            embed_dim,
            num_heads,
            head_dim: embed_dim / num_heads,
            dropout_p,
            policy,
            q_proj,
            kv_proj,
            out_proj,
            attention: ExactAttention::new(),
            attention_config: AttentionConfig::from_env(),
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn expand_to_heads(&self, tensor: &Tensor) -> Result<Tensor> {
        let (batch, seq, _) = tensor.dims3()?;
        Ok(tensor
            .reshape((batch, seq, self.num_heads, self.head_dim))?
            .permute((0, 2, 1, 3))?
            .contiguous()?)
    }

    fn merge_from_heads(&self, tensor: &Tensor) -> Result<Tensor> {
        let (batch, _, seq, _) = tensor.dims4()?;
        Ok(tensor
            .permute((0, 2, 1, 3))?
            .reshape((batch, seq, self.embed_dim))?)
    }

    /// `query` is `(batch, q_len, embed_dim)`, `key_value` is
    /// `(batch, k_len, embed_dim)`; returns `(batch, q_len, embed_dim)`.
    pub fn forward(
        &self,
        query: &Tensor,
        key_value: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("attention.query", query, self.embed_dim)?;
        checks::expect_batch_seq_hidden("attention.key_value", key_value, self.embed_dim)?;

        let q = self.q_proj.forward(query, &self.policy)?;
        let kv = self.kv_proj.forward(key_value, &self.policy)?;
        let k = kv.narrow(2, 0, self.embed_dim)?;
        let v = kv.narrow(2, self.embed_dim, self.embed_dim)?;

        let q_heads = self.expand_to_heads(&q)?;
        let k_heads = self.expand_to_heads(&k)?;
        let v_heads = self.expand_to_heads(&v)?;

        let config = self.attention_config.for_mode(self.dropout_p, train);
        let attended = self
            .attention
            .attend(&q_heads, &k_heads, &v_heads, mask, &config)?;
        let merged = self.merge_from_heads(&attended)?;
        Ok(self.out_proj.forward(&merged, &self.policy)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attention::masks::build_causal_mask;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn cross_attention_keeps_query_length() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mha = MultiHeadAttention::new(16, 4, 0.0, vb.pp("attn"))?;

        let query = Tensor::randn(0f32, 1.0, (2, 3, 16), &device)?;
        let memory = Tensor::randn(0f32, 1.0, (2, 7, 16), &device)?;
        let out = mha.forward(&query, &memory, None, false)?;
        assert_eq!(out.dims(), &[2, 3, 16]);

        let names = varmap.data().lock().map(|vars| {
            let mut names = vars.keys().cloned().collect::<Vec<_>>();
            names.sort();
            names
        });
        assert_eq!(
            names.ok(),
            Some(vec![
                "attn.kv_proj.bias".to_string(),
                "attn.kv_proj.weight".to_string(),
                "attn.out_proj.bias".to_string(),
                "attn.out_proj.weight".to_string(),
                "attn.q_proj.bias".to_string(),
                "attn.q_proj.weight".to_string(),
            ])
        );
        Ok(())
    }

    #[test]
    fn mask_with_wrong_lengths_is_a_shape_mismatch() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mha = MultiHeadAttention::new(8, 2, 0.0, vb)?;

        let x = Tensor::randn(0f32, 1.0, (1, 4, 8), &device)?;
        let mask = build_causal_mask(&device, 1, 2, 3, 3)?;
        let err = mha.forward(&x, &x, Some(&mask), false).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
        Ok(())
    }

    #[test]
    fn heads_must_divide_embedding() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(matches!(
            MultiHeadAttention::new(10, 3, 0.0, vb),
            Err(ModelError::Configuration(_))
        ));
    }
}
