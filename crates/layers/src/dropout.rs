//! Inverted dropout shared by residual branches, feed-forward stacks and
//! attention weights.
//!
//! Dropout only runs when the caller passes `train = true` and the configured
//! probability is positive; otherwise the input is returned unchanged, which
//! keeps evaluation passes deterministic.

use candle_core::{Error, Result, Tensor};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    probability: f32,
}

impl Dropout {
    /// Builds a dropout layer; the probability must lie in `[0, 1)`.
    pub fn new(probability: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(Error::Msg(format!(
                "dropout probability must be in [0, 1), got {probability}"
            )));
        }
        Ok(Self { probability })
    }

    pub fn disabled() -> Self {
        Self { probability: 0.0 }
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    /// Whether a forward pass with the given mode would drop activations.
    pub fn is_active(&self, train: bool) -> bool {
        train && self.probability > 0.0
    }

    /// Zeroes activations with the configured probability and rescales the rest.
    pub fn forward(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        if !self.is_active(train) {
            return Ok(input.clone());
        }
        candle_nn::ops::dropout(input, self.probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn rejects_out_of_range_probabilities() {
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout::new(0.0).is_ok());
    }

    #[test]
    fn evaluation_mode_is_identity() -> Result<()> {
        let dropout = Dropout::new(0.5)?;
        let input = Tensor::randn(0f32, 1.0, (2, 3, 4), &Device::Cpu)?;
        let output = dropout.forward(&input, false)?;
        let diff = input.sub(&output)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        assert!(!Dropout::disabled().is_active(true));
        Ok(())
    }

    #[test]
    fn training_mode_preserves_expectation() -> Result<()> {
        let dropout = Dropout::new(0.25)?;
        let input = Tensor::ones((4, 8, 64), DType::F32, &Device::Cpu)?;
        let output = dropout.forward(&input, true)?;
        let values = output.flatten_all()?.to_vec1::<f32>()?;
        let zeros = values.iter().filter(|v| **v == 0.0).count();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        assert!(zeros > 0);
        assert!((mean - 1.0).abs() < 0.1, "mean {mean}");
        Ok(())
    }
}
