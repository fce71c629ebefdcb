use std::{env, path::PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};
use seq2img::{
    init_logging, setup_device, square_subsequent_mask, DecoderMasks, ImageDecoder,
    ImageDecoderConfig,
};

/// Builds a randomly initialised decoder from an optional `.json`/`.toml`
/// config and pushes one random batch through it.
fn main() -> Result<()> {
    init_logging();

    let config = match env::args().nth(1).map(PathBuf::from) {
        Some(path) => ImageDecoderConfig::from_path(&path)
            .with_context(|| format!("loading decoder config from {}", path.display()))?,
        None => ImageDecoderConfig::default(),
    };
    let batch = env::var("SEQ2IMG_BATCH")
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(1);

    let device = setup_device()?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let decoder = ImageDecoder::new(config.clone(), vb).context("building image decoder")?;
    decoder.set_training(false);

    let tgt_len = decoder.spatial_decoder().num_tokens();
    let embed_dim = config.sequence.embed_dim;
    let target = Tensor::randn(0f32, 1.0, (batch, tgt_len, embed_dim), &device)?;
    let memory = Tensor::randn(0f32, 1.0, (batch, 16, embed_dim), &device)?;
    let causal = square_subsequent_mask(&device, tgt_len)?;

    let image = decoder.forward(&target, &memory, &DecoderMasks::new().with_tgt_mask(&causal))?;
    log::info!(
        "decoded {} tokens into image {:?} (min {:.4}, max {:.4})",
        tgt_len,
        image.dims(),
        image.min_all()?.to_vec0::<f32>()?,
        image.max_all()?.to_vec0::<f32>()?
    );
    Ok(())
}
