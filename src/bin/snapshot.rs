//! snapshot - one-shot frame capture to a JPEG file

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use capture_kernel::{
    CameraCapture, CaptureConfig, LoopOutcome, SnapshotAnalyzer, SyntheticDiscovery,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Device string to capture from.
    #[arg(long, env = "CAPTURE_DEVICE", default_value = "stub://camera0")]
    device: String,
    /// Output directory for the saved frame.
    #[arg(long, default_value = "snapshots")]
    out: String,
    /// Give up after this many milliseconds without a frame.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
    /// Capture width for synthetic sources.
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Capture height for synthetic sources.
    #[arg(long, default_value_t = 480)]
    height: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CaptureConfig::default();
    cfg.source.device = args.device;
    cfg.source.width = args.width;
    cfg.source.height = args.height;
    cfg.processing.repeat = false;
    cfg.processing.timeout = Some(Duration::from_millis(args.timeout_ms));
    cfg.snapshot_dir = args.out.into();

    let discovery = Arc::new(SyntheticDiscovery::new(
        cfg.source.width,
        cfg.source.height,
        cfg.source.fps,
    ));
    let capture = CameraCapture::new(discovery, cfg.clone());

    let analyzer = SnapshotAnalyzer::new(cfg.snapshot_dir.clone());
    let Some(handle) =
        capture.start_processing(analyzer, None::<fn(Option<&std::path::PathBuf>)>, None::<fn()>)?
    else {
        return Err(anyhow!("no capture source found for '{}'", cfg.source.device));
    };

    let (outcome, saved) = handle.wait()?;
    match (outcome, saved) {
        (LoopOutcome::Completed, Some(path)) => {
            println!("{}", path.display());
            Ok(())
        }
        (LoopOutcome::TimedOut, _) => Err(anyhow!(
            "timed out after {}ms without saving a frame",
            args.timeout_ms
        )),
        (outcome, _) => Err(anyhow!("capture ended without a frame: {:?}", outcome)),
    }
}
