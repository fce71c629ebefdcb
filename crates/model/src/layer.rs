use std::fmt;

use candle_core::Tensor;
use candle_nn::VarBuilder;
use layers::{
    FeedForward, FeedForwardConfig, FeedForwardLayer, LayerNorm, NormConfig, NormalizationLayer,
    PrecisionPolicy, Residual, ResidualConfig,
};

use crate::{config::SequenceDecoderConfig, error::Result, mha::MultiHeadAttention};

/// Pre-norm decoder layer: self-attention, cross-attention over memory, then
/// the feed-forward block, each wrapped in a dropout residual.
pub struct DecoderLayer {
    policy: PrecisionPolicy,
    norm1: LayerNorm,
    norm2: LayerNorm,
    norm3: LayerNorm,
    self_attn: MultiHeadAttention,
    cross_attn: MultiHeadAttention,
    ffn: FeedForward,
    residual_self: Residual,
    residual_cross: Residual,
    residual_ffn: Residual,
}

impl fmt::Debug for DecoderLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderLayer")
            .field("self_attn", &self.self_attn)
            .field("cross_attn", &self.cross_attn)
            .field("ffn", &self.ffn)
            .finish()
    }
}

impl DecoderLayer {
    pub fn new(config: &SequenceDecoderConfig, vb: VarBuilder) -> Result<Self> {
        let policy = PrecisionPolicy::from_parameter_dtype(vb.dtype());
        let norm_config = NormConfig::new(config.embed_dim, config.layer_norm_eps);
        let norm1 = LayerNorm::load(norm_config.clone(), vb.pp("norm1"))?;
        let norm2 = LayerNorm::load(norm_config.clone(), vb.pp("norm2"))?;
        let norm3 = LayerNorm::load(norm_config, vb.pp("norm3"))?;

        let self_attn = MultiHeadAttention::new(
            config.embed_dim,
            config.num_heads,
            config.dropout_rate,
            vb.pp("self_attn"),
        )?;
        let cross_attn = MultiHeadAttention::new(
            config.embed_dim,
            config.num_heads,
            config.dropout_rate,
            vb.pp("cross_attn"),
        )?;

        let mut ff_config =
            FeedForwardConfig::new(config.embed_dim, config.feedforward_dim, config.activation);
        ff_config.dropout_p = config.dropout_rate;
        let ffn = FeedForward::load(ff_config, vb.pp("ffn"))?;

        let residual_config = ResidualConfig::new(config.dropout_rate);
        Ok(Self {
            policy,
            norm1,
            norm2,
            norm3,
            self_attn,
            cross_attn,
            ffn,
            residual_self: Residual::new(residual_config.clone())?,
            residual_cross: Residual::new(residual_config.clone())?,
            residual_ffn: Residual::new(residual_config)?,
        })
    }

    /// Masks are additive `[batch, heads, q_len, k_len]` tensors, already
    /// merged with their key padding masks.
    pub fn forward(
        &self,
        hidden: &Tensor,
        memory: &Tensor,
        self_mask: Option<&Tensor>,
        cross_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let normed = self.norm1.forward(hidden, &self.policy)?;
        let attended = self.self_attn.forward(&normed, &normed, self_mask, train)?;
        let hidden = self
            .residual_self
            .prenorm_step(&attended, hidden, &self.policy, train)?;

        let normed = self.norm2.forward(&hidden, &self.policy)?;
        let attended = self.cross_attn.forward(&normed, memory, cross_mask, train)?;
        let hidden = self
            .residual_cross
            .prenorm_step(&attended, &hidden, &self.policy, train)?;

        let normed = self.norm3.forward(&hidden, &self.policy)?;
        let projected = self.ffn.forward(&normed, &self.policy, train)?;
        Ok(self
            .residual_ffn
            .prenorm_step(&projected, &hidden, &self.policy, train)?)
    }
}
