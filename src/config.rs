use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{ChannelOrder, MemoryPreference, PixelFormat};

const DEFAULT_DEVICE: &str = "stub://camera0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<SourceConfigFile>,
    processing: Option<ProcessingConfigFile>,
    snapshot: Option<SnapshotConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ProcessingConfigFile {
    timeout_ms: Option<u64>,
    repeat: Option<bool>,
    pixel_format: Option<PixelFormat>,
    memory_preference: Option<MemoryPreference>,
    channel_order: Option<ChannelOrder>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub source: SourceSettings,
    pub processing: ProcessingSettings,
    pub snapshot_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone)]
pub struct ProcessingSettings {
    pub timeout: Option<Duration>,
    pub repeat: bool,
    pub pixel_format: PixelFormat,
    pub memory_preference: MemoryPreference,
    pub channel_order: ChannelOrder,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceSettings {
                device: DEFAULT_DEVICE.to_string(),
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
                fps: DEFAULT_FPS,
            },
            processing: ProcessingSettings {
                timeout: None,
                repeat: false,
                pixel_format: PixelFormat::Bgra32,
                memory_preference: MemoryPreference::Cpu,
                channel_order: ChannelOrder::Bgr,
            },
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
        }
    }
}

impl CaptureConfig {
    /// Load configuration: optional JSON file named by `CAPTURE_CONFIG`,
    /// then `CAPTURE_*` environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAPTURE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Self {
        let defaults = Self::default();
        let source = SourceSettings {
            device: file
                .source
                .as_ref()
                .and_then(|source| source.device.clone())
                .unwrap_or(defaults.source.device),
            width: file
                .source
                .as_ref()
                .and_then(|source| source.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .source
                .as_ref()
                .and_then(|source| source.height)
                .unwrap_or(DEFAULT_HEIGHT),
            fps: file
                .source
                .as_ref()
                .and_then(|source| source.fps)
                .unwrap_or(DEFAULT_FPS),
        };
        let processing = ProcessingSettings {
            timeout: file
                .processing
                .as_ref()
                .and_then(|processing| processing.timeout_ms)
                .map(Duration::from_millis),
            repeat: file
                .processing
                .as_ref()
                .and_then(|processing| processing.repeat)
                .unwrap_or(false),
            pixel_format: file
                .processing
                .as_ref()
                .and_then(|processing| processing.pixel_format)
                .unwrap_or_default(),
            memory_preference: file
                .processing
                .as_ref()
                .and_then(|processing| processing.memory_preference)
                .unwrap_or_default(),
            channel_order: file
                .processing
                .as_ref()
                .and_then(|processing| processing.channel_order)
                .unwrap_or_default(),
        };
        let snapshot_dir = file
            .snapshot
            .and_then(|snapshot| snapshot.dir)
            .unwrap_or(defaults.snapshot_dir);
        Self {
            source,
            processing,
            snapshot_dir,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("CAPTURE_DEVICE") {
            if !device.trim().is_empty() {
                self.source.device = device;
            }
        }
        if let Ok(fps) = std::env::var("CAPTURE_FPS") {
            let fps: u32 = fps
                .parse()
                .map_err(|_| anyhow!("CAPTURE_FPS must be an integer frame rate"))?;
            self.source.fps = fps;
        }
        if let Ok(timeout) = std::env::var("CAPTURE_TIMEOUT_MS") {
            let millis: u64 = timeout
                .parse()
                .map_err(|_| anyhow!("CAPTURE_TIMEOUT_MS must be an integer number of milliseconds"))?;
            self.processing.timeout = Some(Duration::from_millis(millis));
        }
        if let Ok(repeat) = std::env::var("CAPTURE_REPEAT") {
            self.processing.repeat = match repeat.trim() {
                "1" | "true" => true,
                "0" | "false" => false,
                other => return Err(anyhow!("CAPTURE_REPEAT must be a boolean, got '{}'", other)),
            };
        }
        if let Ok(dir) = std::env::var("CAPTURE_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.snapshot_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source resolution must be non-zero"));
        }
        if let Some(timeout) = self.processing.timeout {
            if timeout.is_zero() {
                return Err(anyhow!("timeout must be greater than zero when set"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
