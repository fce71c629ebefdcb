//! Precision policy shared by every layer in the decoder stack.
//!
//! Parameters may be stored in `f16`/`bf16` while matmuls, convolutions and
//! activations run in at least `f32`. Statistics such as layer norm moments
//! are always reduced in `f32`. Outputs are cast back to the storage dtype so
//! consecutive layers see a consistent layout.

use candle_core::{DType, Result, Tensor};

/// Describes how tensors should be cast during different phases of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    /// Constructs a new policy from explicit dtype selections.
    pub fn new(storage: DType, compute: DType, reduction: DType) -> Self {
        Self {
            storage,
            compute,
            reduction,
        }
    }

    /// Builds a policy from the parameter storage dtype.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        let reduction = match storage {
            DType::F64 => DType::F64,
            _ => DType::F32,
        };
        Self::new(storage, compute, reduction)
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn reduction(&self) -> DType {
        self.reduction
    }

    /// Indicates whether the policy performs mixed precision work.
    pub fn is_mixed_precision(&self) -> bool {
        self.storage != self.compute || self.compute != self.reduction
    }

    /// Casts a tensor to the compute dtype ahead of matmuls and convolutions.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    /// Casts a tensor to the reduction dtype for statistics.
    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.reduction)
    }

    /// Casts a tensor back to the storage dtype (or leaves it unchanged).
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn half_precision_parameters_compute_in_f32() {
        for dtype in [DType::F16, DType::BF16] {
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            assert_eq!(policy.storage(), dtype);
            assert_eq!(policy.compute(), DType::F32);
            assert_eq!(policy.reduction(), DType::F32);
            assert!(policy.is_mixed_precision());
        }
    }

    #[test]
    fn full_precision_policy_is_uniform() {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        assert!(!policy.is_mixed_precision());
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F64);
        assert_eq!(policy.reduction(), DType::F64);
        assert!(!policy.is_mixed_precision());
    }

    #[test]
    fn storage_round_trip_stays_within_bf16_tolerance() -> Result<()> {
        let device = Device::Cpu;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::BF16);
        let base = Tensor::from_vec(vec![0.125f32, -0.75, 3.5], (3,), &device)?;
        let stored = policy.cast_to_storage(&base)?;
        assert_eq!(stored.dtype(), DType::BF16);

        let compute = policy.cast_for_matmul(&stored)?;
        assert_eq!(compute.dtype(), DType::F32);
        let restored = compute.to_vec1::<f32>()?;
        for (orig, rest) in [0.125f32, -0.75, 3.5].iter().zip(restored.iter()) {
            assert!((orig - rest).abs() <= 2e-2);
        }
        Ok(())
    }
}
