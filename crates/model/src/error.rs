//! Error taxonomy for the decoder pipeline.

use attention::AttentionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid construction parameters, detected before any tensor is touched.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// A forward-time tensor violated the documented shape contract.
    #[error("shape mismatch in {context}: {message}")]
    ShapeMismatch { context: String, message: String },
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse json config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse toml config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ModelError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn shape(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Collapses a list of validation failures into one configuration error.
    pub fn validation(messages: Vec<String>) -> Self {
        Self::Configuration(messages.join("; "))
    }
}

impl From<AttentionError> for ModelError {
    fn from(err: AttentionError) -> Self {
        match err {
            AttentionError::InvalidShape { context } => Self::shape("attention", context),
            AttentionError::UnsupportedDType { requested } => Self::shape("attention", requested),
            AttentionError::Backend { message } => {
                Self::Candle(candle_core::Error::Msg(message))
            }
        }
    }
}
