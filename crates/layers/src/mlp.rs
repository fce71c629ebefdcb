//! Position-wise feed-forward blocks built on top of projections and activations.
//!
//! MLPs operate on hidden states shaped `(batch, seq, hidden)` and return the
//! same layout: `linear2(dropout(act(linear1(x))))`, where `linear1` expands to
//! `intermediate_size` and `linear2` contracts back to `hidden_size`.

use std::{fmt, sync::Arc};

use candle_core::{Error, Result, Tensor};
use candle_nn::VarBuilder;

use crate::{
    activations::{builtin, Activation, ActivationKind},
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit, LinearLayer},
};

/// Configuration shared by transformer feed-forward networks.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    /// Activation applied between projections.
    pub activation: ActivationKind,
    /// Dropout applied to the activated intermediate features while training.
    pub dropout_p: f32,
}

impl FeedForwardConfig {
    pub fn new(hidden_size: usize, intermediate_size: usize, activation: ActivationKind) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            activation,
            dropout_p: 0.0,
        }
    }
}

/// Shared interface for feed-forward stacks.
pub trait FeedForwardLayer: Send + Sync {
    /// Configuration metadata used during block assembly.
    fn config(&self) -> &FeedForwardConfig;

    /// Performs the forward pass through the MLP.
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy, train: bool) -> Result<Tensor>;
}

/// Two-projection MLP.
#[derive(Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    linear1: Linear,
    linear2: Linear,
    activation: Arc<dyn Activation>,
    dropout: Dropout,
}

impl fmt::Debug for FeedForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedForward")
            .field("config", &self.config)
            .finish()
    }
}

impl FeedForward {
    /// Creates `linear1` and `linear2` under `vb` with dense-layer initialisation.
    pub fn load(config: FeedForwardConfig, vb: VarBuilder) -> Result<Self> {
        if config.hidden_size == 0 || config.intermediate_size == 0 {
            return Err(Error::Msg(format!(
                "feed-forward sizes must be non-zero, got {config:?}"
            )));
        }
        let init = LinearInit::dense_default();
        let linear1 = Linear::load(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            &init,
            vb.pp("linear1"),
        )?;
        let linear2 = Linear::load(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            &init,
            vb.pp("linear2"),
        )?;
        let activation = builtin(config.activation);
        let dropout = Dropout::new(config.dropout_p)?;
        Ok(Self {
            config,
            linear1,
            linear2,
            activation,
            dropout,
        })
    }
}

impl FeedForwardLayer for FeedForward {
    fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy, train: bool) -> Result<Tensor> {
        let expanded = self.linear1.forward(hidden, policy)?;
        let activated = self.activation.forward(&expanded, policy)?;
        let activated = self.dropout.forward(&activated, train)?;
        self.linear2.forward(&activated, policy)
    }
}
