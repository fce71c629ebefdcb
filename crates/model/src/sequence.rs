//! Stacked decoder layers conditioned on an encoded memory sequence.

use std::sync::atomic::{AtomicBool, Ordering};

use attention::masks::{expand_attention_mask, expand_key_padding_mask, merge_masks};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use layers::{LayerNorm, NormConfig, NormalizationLayer, PrecisionPolicy};

use crate::{
    config::SequenceDecoderConfig,
    error::{ModelError, Result},
    layer::DecoderLayer,
};

/// Optional masks for one decoder invocation.
///
/// * `tgt_mask`: `(tgt_len, tgt_len)` or `(batch * heads, tgt_len, tgt_len)`
/// * `memory_mask`: `(tgt_len, src_len)` or `(batch * heads, tgt_len, src_len)`
/// * `tgt_key_padding_mask`: `(batch, tgt_len)`
/// * `memory_key_padding_mask`: `(batch, src_len)`
///
/// Integer masks block where non-zero, float masks are added to the scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderMasks<'a> {
    pub tgt_mask: Option<&'a Tensor>,
    pub memory_mask: Option<&'a Tensor>,
    pub tgt_key_padding_mask: Option<&'a Tensor>,
    pub memory_key_padding_mask: Option<&'a Tensor>,
}

impl<'a> DecoderMasks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tgt_mask(mut self, mask: &'a Tensor) -> Self {
        self.tgt_mask = Some(mask);
        self
    }

    pub fn with_memory_mask(mut self, mask: &'a Tensor) -> Self {
        self.memory_mask = Some(mask);
        self
    }

    pub fn with_tgt_key_padding_mask(mut self, mask: &'a Tensor) -> Self {
        self.tgt_key_padding_mask = Some(mask);
        self
    }

    pub fn with_memory_key_padding_mask(mut self, mask: &'a Tensor) -> Self {
        self.memory_key_padding_mask = Some(mask);
        self
    }
}

/// Transformer decoder stack producing one feature token per target token.
#[derive(Debug)]
pub struct SequenceDecoder {
    config: SequenceDecoderConfig,
    policy: PrecisionPolicy,
    layers: Vec<DecoderLayer>,
    final_norm: Option<LayerNorm>,
    training: AtomicBool,
}

impl SequenceDecoder {
    /// Builds `num_layers` layers under `vb.pp("layers.{i}")`.
    pub fn new(config: SequenceDecoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let policy = PrecisionPolicy::from_parameter_dtype(vb.dtype());

        let layers_vb = vb.pp("layers");
        let layers = (0..config.num_layers)
            .map(|index| DecoderLayer::new(&config, layers_vb.pp(index.to_string())))
            .collect::<Result<Vec<_>>>()?;
        let final_norm = if config.final_norm {
            Some(LayerNorm::load(
                NormConfig::new(config.embed_dim, config.layer_norm_eps),
                vb.pp("norm"),
            )?)
        } else {
            None
        };

        log::info!(
            "sequence decoder init embed_dim={} heads={} ff_dim={} layers={} dropout={} activation={:?} final_norm={}",
            config.embed_dim,
            config.num_heads,
            config.feedforward_dim,
            config.num_layers,
            config.dropout_rate,
            config.activation,
            config.final_norm
        );

        Ok(Self {
            config,
            policy,
            layers,
            final_norm,
            training: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &SequenceDecoderConfig {
        &self.config
    }

    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    /// `target` is `(batch, tgt_len, embed_dim)`, `memory` is
    /// `(batch, src_len, embed_dim)`; the output has the shape of `target`.
    pub fn forward(&self, target: &Tensor, memory: &Tensor, masks: &DecoderMasks) -> Result<Tensor> {
        let (batch, tgt_len, src_len) = self.validate_inputs(target, memory)?;
        if batch == 0 || tgt_len == 0 {
            log::debug!("sequence decoder forward on empty target {:?}", target.dims());
            return Ok(target.clone());
        }
        if src_len == 0 {
            return Err(ModelError::shape(
                "sequence decoder memory",
                "memory must hold at least one position for a non-empty target",
            ));
        }
        let (self_mask, cross_mask) = self.prepare_masks(masks, batch, tgt_len, src_len)?;
        let train = self.is_training();

        let mut hidden = target.clone();
        for layer in &self.layers {
            hidden = layer.forward(
                &hidden,
                memory,
                self_mask.as_ref(),
                cross_mask.as_ref(),
                train,
            )?;
        }
        if let Some(norm) = &self.final_norm {
            hidden = norm.forward(&hidden, &self.policy)?;
        }

        log::debug!(
            "sequence decoder forward target={:?} memory={:?} train={train}",
            target.dims(),
            memory.dims()
        );
        Ok(hidden)
    }

    fn validate_inputs(&self, target: &Tensor, memory: &Tensor) -> Result<(usize, usize, usize)> {
        let embed_dim = self.config.embed_dim;
        let (batch, tgt_len, tgt_embed) = match *target.dims() {
            [b, t, e] => (b, t, e),
            ref dims => {
                return Err(ModelError::shape(
                    "sequence decoder target",
                    format!("expected (batch, tgt_len, {embed_dim}), got {dims:?}"),
                ))
            }
        };
        let (mem_batch, src_len, mem_embed) = match *memory.dims() {
            [b, s, e] => (b, s, e),
            ref dims => {
                return Err(ModelError::shape(
                    "sequence decoder memory",
                    format!("expected (batch, src_len, {embed_dim}), got {dims:?}"),
                ))
            }
        };
        if tgt_embed != embed_dim || mem_embed != embed_dim {
            return Err(ModelError::shape(
                "sequence decoder embed_dim",
                format!(
                    "target has {tgt_embed}, memory has {mem_embed}, decoder expects {embed_dim}"
                ),
            ));
        }
        if batch != mem_batch {
            return Err(ModelError::shape(
                "sequence decoder batch",
                format!("target batch {batch} differs from memory batch {mem_batch}"),
            ));
        }
        Ok((batch, tgt_len, src_len))
    }

    /// Normalises the four user masks once into additive
    /// `[batch, heads, q_len, k_len]` self- and cross-attention masks.
    fn prepare_masks(
        &self,
        masks: &DecoderMasks,
        batch: usize,
        tgt_len: usize,
        src_len: usize,
    ) -> Result<(Option<Tensor>, Option<Tensor>)> {
        let heads = self.config.num_heads;
        let expand = |mask: Option<&Tensor>, k_len: usize| {
            mask.map(|m| expand_attention_mask(m, batch, heads, tgt_len, k_len))
                .transpose()
        };
        let expand_padding = |mask: Option<&Tensor>, k_len: usize| {
            mask.map(|m| expand_key_padding_mask(m, batch, heads, tgt_len, k_len))
                .transpose()
        };

        let self_mask = merge_masks(
            expand(masks.tgt_mask, tgt_len)?,
            expand_padding(masks.tgt_key_padding_mask, tgt_len)?,
        )?;
        let cross_mask = merge_masks(
            expand(masks.memory_mask, src_len)?,
            expand_padding(masks.memory_key_padding_mask, src_len)?,
        )?;
        Ok((self_mask, cross_mask))
    }
}
