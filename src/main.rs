use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use us_reconstruction::{
    CancelToken, ReconstructionError, ReconstructionExecutor, ReconstructionParams,
    TracingObserver,
    enums::Orientation,
    synthetic::{SweepConfig, linear_sweep},
};

/// Reconstruct a synthetic freehand sweep and save a slice of the result.
#[derive(Parser, Debug)]
#[command(name = "us-reconstruction")]
struct Args {
    /// Reconstruction parameters as JSON
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Number of frames in the sweep
    #[arg(short, long, default_value = "40")]
    frames: usize,

    /// Probe tilt per frame in degrees
    #[arg(long, default_value = "0.0")]
    tilt: f64,

    /// Output image of the central coronal slice
    #[arg(short, long, default_value = "result.png")]
    output: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ReconstructionError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let params = match &args.params {
        Some(path) => ReconstructionParams::from_json_file(path)?,
        None => ReconstructionParams::default(),
    };
    let raw = linear_sweep(&SweepConfig {
        frame_count: args.frames,
        tilt_per_frame_rad: args.tilt.to_radians(),
        ..Default::default()
    });

    let executor = ReconstructionExecutor::new(Arc::new(TracingObserver::default()));
    let output = executor.start(&raw, &params, CancelToken::new())?.finished().await?;

    for warning in &output.warnings {
        info!("Skipped {warning}");
    }
    let volume = &output.bmode;
    let image = volume
        .get_image_from_axis(volume.dim().1 / 2, Orientation::Coronal)
        .ok_or_else(|| ReconstructionError::invalid_input("reconstructed volume is empty"))?;
    image.save(&args.output)?;
    info!("Saved {}", args.output.display());
    Ok(())
}
