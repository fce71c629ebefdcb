use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use seq2img::{
    init_logging, square_subsequent_mask, DecoderMasks, ImageDecoder, ImageDecoderConfig,
    SequenceDecoderConfig, SpatialDecoderConfig,
};

#[test]
fn facade_runs_the_full_pipeline() -> Result<()> {
    init_logging();
    let device = Device::Cpu;
    let config = ImageDecoderConfig {
        sequence: SequenceDecoderConfig::new(8, 2, 16, 0.0, 1),
        spatial: SpatialDecoderConfig::new(8, 8, 16),
    };
    let varmap = VarMap::new();
    let decoder = ImageDecoder::new(config, VarBuilder::from_varmap(&varmap, DType::F32, &device))?;

    let target = Tensor::randn(0f32, 1.0, (3, 2, 8), &device)?;
    let memory = Tensor::randn(0f32, 1.0, (3, 4, 8), &device)?;
    let causal = square_subsequent_mask(&device, 2)?;
    let image = decoder.forward(&target, &memory, &DecoderMasks::new().with_tgt_mask(&causal))?;

    assert_eq!(image.dims(), &[3, 3, 8, 16]);
    assert!(image.min_all()?.to_vec0::<f32>()? >= 0.0);
    Ok(())
}
