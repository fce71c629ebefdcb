//! Sequence-to-image decoder core.
//!
//! Re-exports the building blocks (`layers`, `attention`) and the decoder
//! pipeline (`model`), plus the device and logging helpers used by binaries.

pub use attention;
pub use layers;
pub use model;

pub use crate::attention::masks::{build_causal_mask, square_subsequent_mask};
pub use crate::model::{
    DecoderMasks, ImageDecoder, ImageDecoderConfig, ModelError, SequenceDecoder,
    SequenceDecoderConfig, SpatialDecoder, SpatialDecoderConfig,
};

use anyhow::Result;
use candle_core::Device;

/// Environment variable that pins execution to the CPU backend.
pub const FORCE_CPU_ENV: &str = "CANDLE_FORCE_CPU";

/// Installs `env_logger` (honouring `RUST_LOG`); repeated calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(cfg!(test))
        .try_init();
}

/// Picks Metal, then CUDA, then CPU, unless `CANDLE_FORCE_CPU` is set.
pub fn setup_device() -> Result<Device> {
    if std::env::var_os(FORCE_CPU_ENV).is_some() {
        log::info!("{FORCE_CPU_ENV} set, using CPU backend");
        return Ok(Device::Cpu);
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => match preflight(&device) {
                Ok(()) => {
                    log::info!("metal device selected: {device:?}");
                    return Ok(device);
                }
                Err(err) => log::warn!("metal preflight failed ({err}), falling back"),
            },
            Err(err) => log::info!("metal unavailable: {err}"),
        }
    }

    match Device::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => {
            log::info!("cuda device selected: {device:?}");
            Ok(device)
        }
        _ => {
            log::info!("using CPU backend");
            Ok(Device::Cpu)
        }
    }
}

/// Runs the kernels the decoder depends on once to catch broken backends.
#[cfg(feature = "metal")]
fn preflight(device: &Device) -> Result<()> {
    use candle_core::{DType, Tensor};

    let a = Tensor::ones((2, 4), DType::F32, device)?;
    let b = Tensor::ones((4, 2), DType::F32, device)?;
    let _ = a.matmul(&b)?;

    let image = Tensor::randn(0f32, 1.0, (1, 4, 8, 8), device)?;
    let kernel = Tensor::randn(0f32, 1.0, (4, 4, 3, 3), device)?;
    let _ = image.conv2d(&kernel, 1, 1, 1, 1)?.upsample_nearest2d(16, 16)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_can_be_initialised_twice() {
        init_logging();
        init_logging();
    }

    #[test]
    fn forced_cpu_is_honoured() -> Result<()> {
        std::env::set_var(FORCE_CPU_ENV, "1");
        let device = setup_device()?;
        std::env::remove_var(FORCE_CPU_ENV);
        assert!(device.is_cpu());
        Ok(())
    }
}
