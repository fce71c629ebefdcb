//! Activation catalogue for the decoder stacks.
//!
//! Activations are shape preserving and work for both `(batch, seq, hidden)`
//! sequences and `(batch, channels, height, width)` feature maps. Inputs are
//! promoted to the compute dtype from [`PrecisionPolicy`] before the
//! non-linearity and cast back to the storage dtype afterwards.
//!
//! * **ReLU** `max(x, 0)`: feed-forward default and the spatial stage
//!   non-linearity. Clamps the value range to `[0, inf)`.
//! * **GELU** `0.5 * x * (1 + erf(x / sqrt(2)))`: alternative feed-forward
//!   activation.
//! * **Identity**: leaves values untouched, used to opt out of the final
//!   spatial clamp.

use std::sync::Arc;

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

use crate::dtypes::PrecisionPolicy;

/// Identifies which non-linearity is implemented by an [`Activation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    /// Identity function.
    Identity,
    /// Rectified linear unit.
    #[default]
    Relu,
    /// Erf-based GELU.
    Gelu,
}

/// Common interface shared by activation functions.
pub trait Activation: Send + Sync {
    /// Returns the [`ActivationKind`] for introspection when wiring composite blocks.
    fn kind(&self) -> ActivationKind;

    /// Applies the activation to `input` using the precision rules in `policy`.
    fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

/// Built-in activation backed by Candle kernels.
struct BuiltinActivation {
    kind: ActivationKind,
}

impl Activation for BuiltinActivation {
    fn kind(&self) -> ActivationKind {
        self.kind
    }

    fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        match self.kind {
            ActivationKind::Identity => policy.cast_to_storage(input),
            ActivationKind::Relu => {
                let compute = policy.cast_for_matmul(input)?;
                policy.cast_to_storage(&compute.relu()?)
            }
            ActivationKind::Gelu => {
                let compute = policy.cast_for_matmul(input)?;
                policy.cast_to_storage(&compute.gelu_erf()?)
            }
        }
    }
}

/// Returns a shared built-in activation implementation.
pub fn builtin(kind: ActivationKind) -> Arc<dyn Activation> {
    Arc::new(BuiltinActivation { kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::f64::consts::SQRT_2;

    #[test]
    fn relu_clamps_negative_feature_map_values() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_vec(vec![-2.0f32, -0.5, 0.0, 0.5, 3.0, -1.0], (1, 1, 2, 3), &device)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let output = builtin(ActivationKind::Relu).forward(&input, &policy)?;

        assert_eq!(output.dims(), &[1, 1, 2, 3]);
        let values = output.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(values, vec![0.0, 0.0, 0.0, 0.5, 3.0, 0.0]);
        Ok(())
    }

    #[test]
    fn gelu_matches_reference_formula() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[-2.5f32, -0.5, 0.0, 1.0, 3.0], (5,), &device)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let output = builtin(ActivationKind::Gelu).forward(&input, &policy)?;

        let scaled = input.affine(1.0 / SQRT_2, 0.0)?.erf()?;
        let inner = (Tensor::ones_like(&scaled)? + scaled)?;
        let reference = input.affine(0.5, 0.0)?.mul(&inner)?;

        let diff = output.sub(&reference)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 5e-6);
        Ok(())
    }

    #[test]
    fn identity_keeps_storage_dtype() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[-1.0f32, 2.0], (2,), &device)?.to_dtype(DType::BF16)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::BF16);
        let activation = builtin(ActivationKind::Identity);
        let output = activation.forward(&input, &policy)?;
        assert_eq!(activation.kind(), ActivationKind::Identity);
        assert_eq!(output.dtype(), DType::BF16);
        assert_eq!(output.to_dtype(DType::F32)?.to_vec1::<f32>()?, vec![-1.0, 2.0]);
        Ok(())
    }
}
