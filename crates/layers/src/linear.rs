//! Linear and affine projection helpers.
//!
//! Linear layers expect inputs shaped `(batch, seq, in_dim)` (or `(rows,
//! in_dim)`) and return `(batch, seq, out_dim)`. Multi-projection variants pack
//! the output as `(batch, seq, num_projections * output_dim)` so callers can
//! split keys from values with `narrow`. Weights and activations are cast to
//! [`PrecisionPolicy::compute`] for the matmul and the result is cast back to
//! the storage dtype.
//!
//! Parameters are created through a [`VarBuilder`], which lets the owner of
//! the builder decide where they live: a `VarMap` handed to an optimizer, or a
//! checkpoint loaded from disk.

use candle_core::{Error, Result, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension per projection shard.
    pub output_dim: usize,
    /// Number of projections fused together (1 for standard linear).
    pub fused_projections: usize,
}

impl LinearConfig {
    /// Creates a configuration for a single projection layer.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            fused_projections: 1,
        }
    }

    /// Total number of output features produced by the layer.
    pub fn total_output_dim(&self) -> usize {
        self.output_dim * self.fused_projections
    }
}

/// Shared interface for affine projections.
pub trait LinearLayer: Send + Sync {
    /// Returns the static configuration used to validate inputs.
    fn config(&self) -> &LinearConfig;

    /// Applies the linear projection, promoting to the compute dtype when needed.
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

/// Weight initialisation policies used when parameters are freshly created.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearInit {
    /// Xavier/Glorot uniform weights with zero bias (attention projections).
    XavierUniform,
    /// Kaiming/He uniform weights with a fan-in uniform bias.
    KaimingUniform { negative_slope: f64 },
}

impl LinearInit {
    /// Initialisation of a plain dense layer: Kaiming uniform with
    /// `negative_slope = sqrt(5)`, which bounds weights by `1 / sqrt(fan_in)`.
    pub fn dense_default() -> Self {
        Self::KaimingUniform {
            negative_slope: 5f64.sqrt(),
        }
    }

    fn weight_init(&self, fan_in: usize, fan_out: usize) -> Init {
        let (fan_in, fan_out) = (fan_in as f64, fan_out as f64);
        let bound = match self {
            LinearInit::XavierUniform => (6.0 / (fan_in + fan_out)).sqrt(),
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0 / (1.0 + negative_slope.powi(2))).sqrt();
                3f64.sqrt() * gain / fan_in.sqrt()
            }
        };
        Init::Uniform {
            lo: -bound,
            up: bound,
        }
    }

    fn bias_init(&self, fan_in: usize) -> Init {
        match self {
            LinearInit::XavierUniform => Init::Const(0.0),
            LinearInit::KaimingUniform { .. } => {
                let bound = 1.0 / (fan_in as f64).sqrt();
                Init::Uniform {
                    lo: -bound,
                    up: bound,
                }
            }
        }
    }
}

/// Dense affine projection `x W^T + b` with a mixed-precision aware forward pass.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Tensor,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Tensor) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        checks::expect_shape("linear.bias", &bias, &[config.total_output_dim()])?;
        checks::expect_same_dtype("linear.bias", &bias, "linear.weight", &weight)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Fetches (or creates) `weight` and `bias` under `vb`, initialised per `init`.
    pub fn load(config: LinearConfig, init: &LinearInit, vb: VarBuilder) -> Result<Self> {
        if config.input_dim == 0 || config.output_dim == 0 || config.fused_projections == 0 {
            return Err(Error::Msg(format!(
                "linear dimensions must be non-zero, got {config:?}"
            )));
        }
        let out_dim = config.total_output_dim();
        let weight = vb.get_with_hints(
            (out_dim, config.input_dim),
            "weight",
            init.weight_init(config.input_dim, out_dim),
        )?;
        let bias = vb.get_with_hints(out_dim, "bias", init.bias_init(config.input_dim))?;
        Self::new(config, weight, bias)
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.total_output_dim(), config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, checks::FLOAT_DTYPES)
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        match hidden.dims() {
            [_, _, _] => {
                checks::expect_batch_seq_hidden("linear.input", hidden, self.config.input_dim)
            }
            [_, hidden_dim] if *hidden_dim == self.config.input_dim => Ok(()),
            dims => Err(Error::Msg(format!(
                "linear expects input shaped [B, T, {}] or [T, {}], got {dims:?}",
                self.config.input_dim, self.config.input_dim
            ))),
        }
    }
}

impl LinearLayer for Linear {
    fn config(&self) -> &LinearConfig {
        &self.config
    }

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        self.validate_input(hidden)?;

        let input = policy.cast_for_matmul(hidden)?;
        let weight_t = policy.cast_for_matmul(&self.weight)?.t()?;
        let out_dim = self.config.total_output_dim();

        let output = match input.dims() {
            [batch, seq, _] => {
                let (batch, seq) = (*batch, *seq);
                input
                    .reshape((batch * seq, self.config.input_dim))?
                    .matmul(&weight_t)?
                    .reshape((batch, seq, out_dim))?
            }
            _ => input.matmul(&weight_t)?,
        };

        let output = output.broadcast_add(&policy.cast_for_matmul(&self.bias)?)?;
        policy.cast_to_storage(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn reference_linear(input: &Tensor, weight: &Tensor, bias: &Tensor) -> Result<Tensor> {
        let (batch, seq, hidden) = input.dims3()?;
        input
            .reshape((batch * seq, hidden))?
            .matmul(&weight.t()?)?
            .reshape((batch, seq, weight.dims()[0]))?
            .broadcast_add(bias)
    }

    #[test]
    fn forward_matches_reference_across_dtypes() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig {
            input_dim: 8,
            output_dim: 4,
            fused_projections: 2,
        };
        let weight = Tensor::randn(0f32, 0.05, (config.total_output_dim(), 8), &device)?;
        let bias = Tensor::randn(0f32, 0.02, config.total_output_dim(), &device)?;

        for &dtype in &[DType::F32, DType::F64, DType::F16, DType::BF16] {
            let linear = Linear::new(
                config.clone(),
                weight.to_dtype(dtype)?,
                bias.to_dtype(dtype)?,
            )?;
            let input = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?.to_dtype(dtype)?;
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            let output = linear.forward(&input, &policy)?;

            assert_eq!(output.dims(), &[2, 5, 8]);
            assert_eq!(output.dtype(), dtype);

            let reference = reference_linear(&input.to_dtype(DType::F32)?, &weight, &bias)?;
            let max = output
                .to_dtype(DType::F32)?
                .sub(&reference)?
                .abs()?
                .max_all()?
                .to_vec0::<f32>()?;
            let tol = match dtype {
                DType::F16 => 1e-2,
                DType::BF16 => 2e-2,
                _ => 1e-4,
            };
            assert!(max <= tol, "max diff {max} for {dtype:?}");
        }
        Ok(())
    }

    #[test]
    fn load_registers_named_parameters() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let linear = Linear::load(
            LinearConfig::new(16, 32),
            &LinearInit::XavierUniform,
            vb.pp("proj"),
        )?;

        let data = varmap.data().lock().map_err(|_| Error::Msg("poisoned".into()))?;
        assert!(data.contains_key("proj.weight"));
        assert!(data.contains_key("proj.bias"));
        drop(data);

        let bound = (6.0f32 / 48.0).sqrt();
        let max = linear.weight().abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(max <= bound + 1e-6);
        let bias_max = linear.bias().abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(bias_max, 0.0);
        Ok(())
    }

    #[test]
    fn dense_default_bounds_weights_by_fan_in() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let linear = Linear::load(LinearConfig::new(64, 8), &LinearInit::dense_default(), vb)?;
        let max = linear.weight().abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(max <= 1.0 / 8.0 + 1e-6);
        Ok(())
    }

    #[test]
    fn rejects_mismatched_input_width() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::new(
            LinearConfig::new(4, 4),
            Tensor::zeros((4, 4), DType::F32, &device)?,
            Tensor::zeros(4, DType::F32, &device)?,
        )?;
        let input = Tensor::zeros((1, 2, 5), DType::F32, &device)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        assert!(linear.forward(&input, &policy).is_err());
        Ok(())
    }
}
