use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use capture_kernel::{CaptureConfig, ChannelOrder, MemoryPreference, PixelFormat};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAPTURE_CONFIG",
        "CAPTURE_DEVICE",
        "CAPTURE_FPS",
        "CAPTURE_TIMEOUT_MS",
        "CAPTURE_REPEAT",
        "CAPTURE_SNAPSHOT_DIR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": {
            "device": "stub://bench",
            "width": 800,
            "height": 600,
            "fps": 12
        },
        "processing": {
            "timeout_ms": 1500,
            "repeat": true,
            "pixel_format": "bgra32",
            "memory_preference": "gpu",
            "channel_order": "bgra"
        },
        "snapshot": {
            "dir": "bench_frames"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("CAPTURE_CONFIG", file.path());
    std::env::set_var("CAPTURE_DEVICE", "stub://override");
    std::env::set_var("CAPTURE_TIMEOUT_MS", "250");

    let cfg = CaptureConfig::load().expect("load config");

    assert_eq!(cfg.source.device, "stub://override");
    assert_eq!(cfg.source.width, 800);
    assert_eq!(cfg.source.height, 600);
    assert_eq!(cfg.source.fps, 12);
    assert_eq!(cfg.processing.timeout, Some(Duration::from_millis(250)));
    assert!(cfg.processing.repeat);
    assert_eq!(cfg.processing.pixel_format, PixelFormat::Bgra32);
    assert_eq!(cfg.processing.memory_preference, MemoryPreference::Gpu);
    assert_eq!(cfg.processing.channel_order, ChannelOrder::Bgra);
    assert_eq!(cfg.snapshot_dir.to_str(), Some("bench_frames"));

    clear_env();
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CaptureConfig::load().expect("load config");

    assert_eq!(cfg.source.device, "stub://camera0");
    assert_eq!((cfg.source.width, cfg.source.height), (640, 480));
    assert!(cfg.processing.timeout.is_none());
    assert!(!cfg.processing.repeat);
    assert_eq!(cfg.processing.memory_preference, MemoryPreference::Cpu);
    assert_eq!(cfg.processing.channel_order, ChannelOrder::Bgr);

    clear_env();
}

#[test]
fn malformed_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAPTURE_TIMEOUT_MS", "soon");
    assert!(CaptureConfig::load().is_err());
    clear_env();

    std::env::set_var("CAPTURE_REPEAT", "sometimes");
    assert!(CaptureConfig::load().is_err());
    clear_env();

    // Zero timeout fails validation, not parsing.
    std::env::set_var("CAPTURE_TIMEOUT_MS", "0");
    assert!(CaptureConfig::load().is_err());
    clear_env();
}
