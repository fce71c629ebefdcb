//! Residual connections for pre-norm blocks.
//!
//! Residual branches combine tensors of shape `(batch, seq, hidden)`. The
//! branch output is dropped out (training only) and added
//! to the untouched residual stream in the compute dtype.

use candle_core::{Result, Tensor};

use crate::{checks, dropout::Dropout, dtypes::PrecisionPolicy};

/// Configuration describing how residual blocks are wired.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualConfig {
    /// Dropout probability applied to the transformed branch during training.
    pub dropout_p: f32,
}

impl ResidualConfig {
    pub fn new(dropout_p: f32) -> Self {
        Self { dropout_p }
    }
}

/// Residual add helper with branch dropout.
#[derive(Debug, Clone)]
pub struct Residual {
    config: ResidualConfig,
    dropout: Dropout,
}

impl Residual {
    pub fn new(config: ResidualConfig) -> Result<Self> {
        let dropout = Dropout::new(config.dropout_p)?;
        Ok(Self { config, dropout })
    }

    pub fn config(&self) -> &ResidualConfig {
        &self.config
    }

    /// Adds `branch` to `residual` in the compute dtype.
    pub fn add(&self, branch: &Tensor, residual: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_rank("residual.input", residual, 3)?;
        checks::expect_shape("residual.branch", branch, residual.dims())?;

        let branch = policy.cast_for_matmul(branch)?;
        let residual = policy.cast_for_matmul(residual)?;
        policy.cast_to_storage(&branch.add(&residual)?)
    }

    /// Pre-norm residual step: `residual + dropout(branch)`.
    ///
    /// `branch` is the output of a sub-block that was fed the normalised
    /// residual stream.
    pub fn prenorm_step(
        &self,
        branch: &Tensor,
        residual: &Tensor,
        policy: &PrecisionPolicy,
        train: bool,
    ) -> Result<Tensor> {
        let dropped = self.dropout.forward(branch, train)?;
        self.add(&dropped, residual, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn policy(dtype: DType) -> PrecisionPolicy {
        PrecisionPolicy::from_parameter_dtype(dtype)
    }

    #[test]
    fn residual_add_preserves_shape_and_dtype() -> Result<()> {
        let device = Device::Cpu;
        let dtype = DType::F16;
        let residual = Residual::new(ResidualConfig::new(0.0))?;
        let left = Tensor::randn(0f32, 1.0, (2, 4, 8), &device)?.to_dtype(dtype)?;
        let right = Tensor::randn(0f32, 1.0, (2, 4, 8), &device)?.to_dtype(dtype)?;
        let out = residual.add(&left, &right, &policy(dtype))?;
        assert_eq!(out.dims(), &[2, 4, 8]);
        assert_eq!(out.dtype(), dtype);
        Ok(())
    }

    #[test]
    fn prenorm_step_skips_dropout_in_evaluation() -> Result<()> {
        let device = Device::Cpu;
        let residual = Residual::new(ResidualConfig::new(0.5))?;
        let branch = Tensor::full(0.2f32, (1, 1, 3), &device)?;
        let parent = Tensor::full(1.0f32, (1, 1, 3), &device)?;
        let out = residual.prenorm_step(&branch, &parent, &policy(DType::F32), false)?;
        let values = out.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| (*v - 1.2).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn mismatched_branch_shape_is_rejected() -> Result<()> {
        let device = Device::Cpu;
        let residual = Residual::new(ResidualConfig::new(0.0))?;
        let branch = Tensor::zeros((1, 2, 3), DType::F32, &device)?;
        let parent = Tensor::zeros((1, 3, 3), DType::F32, &device)?;
        assert!(residual.add(&branch, &parent, &policy(DType::F32)).is_err());
        Ok(())
    }
}
