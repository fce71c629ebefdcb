//! Configuration options shared by all attention implementations.
//!
//! [`Config`] captures run-time knobs that callers can tune without swapping
//! kernels. The reduction precision can be overridden through the
//! `SEQ2IMG_ATTN_PRECISION` environment variable (`f32` or `inherit`).

/// Environment variable consulted by [`Config::from_env`].
pub const PRECISION_ENV: &str = "SEQ2IMG_ATTN_PRECISION";

/// Dtype used for the score matmul, softmax and value aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttentionPrecision {
    /// Promote q, k and v to `f32`. `f64` inputs are never narrowed.
    #[default]
    ForceF32,
    /// Compute in the dtype of the inputs. Half precision still runs in
    /// `f32` on the CPU backend, which has no half-precision matmul.
    Inherit,
}

impl AttentionPrecision {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "f32" | "force_f32" | "fp32" => Some(Self::ForceF32),
            "inherit" | "native" => Some(Self::Inherit),
            _ => None,
        }
    }
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    /// Probability for dropout applied to attention weights during training.
    ///
    /// When `None`, dropout is disabled and the computation is deterministic.
    pub dropout_p: Option<f32>,
    /// Precision used inside the kernel.
    pub precision: AttentionPrecision,
}

impl Config {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies `SEQ2IMG_ATTN_PRECISION` when it is set to a recognised value.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(PRECISION_ENV) {
            match AttentionPrecision::parse(&raw) {
                Some(precision) => self.precision = precision,
                None => log::warn!("ignoring unrecognised {PRECISION_ENV}={raw:?}"),
            }
        }
    }

    /// Copy of this configuration with dropout enabled only when training.
    pub fn for_mode(&self, dropout_p: f32, train: bool) -> Self {
        let mut config = self.clone();
        config.dropout_p = (train && dropout_p > 0.0).then_some(dropout_p);
        config
    }
}
