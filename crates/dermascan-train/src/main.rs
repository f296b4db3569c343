use anyhow::Context;
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use clap::Parser;
use dermascan_train::cli::TrainArgs;
use dermascan_train::train;

type Backend = Autodiff<NdArray>;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = TrainArgs::parse();
    let config = args
        .training_config()
        .context("Failed to parse --config")?;
    log::debug!("Training configuration: {config:?}");

    let device = NdArrayDevice::default();
    let report = train::<Backend>(&args.paths(), &config, &device)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
