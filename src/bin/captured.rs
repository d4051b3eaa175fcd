//! captured - camera capture daemon
//!
//! This daemon:
//! 1. Loads capture configuration (file + environment)
//! 2. Discovers the configured frame source and starts a session
//! 3. Runs the continuous (repeat) processing loop with a brightness
//!    trigger analyzer on a background worker
//! 4. Stops cooperatively on Ctrl-C

use anyhow::Result;
use std::sync::Arc;

use capture_kernel::{BrightnessAnalyzer, CameraCapture, CaptureConfig, SyntheticDiscovery};

const BRIGHTNESS_TRIGGER: u8 = 96;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut cfg = CaptureConfig::load()?;
    // The daemon streams until told otherwise.
    cfg.processing.repeat = true;

    let discovery = Arc::new(SyntheticDiscovery::new(
        cfg.source.width,
        cfg.source.height,
        cfg.source.fps,
    ));
    let capture = Arc::new(CameraCapture::new(discovery, cfg.clone()));

    log::info!(
        "captured starting on {} ({}x{} @ {} fps)",
        cfg.source.device,
        cfg.source.width,
        cfg.source.height,
        cfg.source.fps
    );

    let analyzer = BrightnessAnalyzer::new(BRIGHTNESS_TRIGGER);
    let on_result = |result: Option<&u8>| match result {
        Some(mean) => log::info!("brightness trigger: mean={}", mean),
        None => log::warn!("capture timed out without a result"),
    };
    let Some(handle) = capture.start_processing(analyzer, Some(on_result), None::<fn()>)? else {
        log::warn!("no capture source found for '{}', exiting", cfg.source.device);
        return Ok(());
    };

    let ctrlc_capture = capture.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping capture loop...");
        ctrlc_capture.request_stop();
    })
    .expect("error setting Ctrl-C handler");

    let (outcome, _) = handle.wait()?;
    log::info!("captured finished: {:?}", outcome);
    Ok(())
}
