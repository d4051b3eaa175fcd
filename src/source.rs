//! Frame sources.
//!
//! Device/source discovery is an external collaborator: the kernel sees it
//! only through the `FrameDiscovery` trait, which resolves a `SourceHandle`,
//! enumerates the stream properties the source offers, and opens a
//! `FrameReader` for the negotiated properties.
//!
//! A synthetic backend (`stub://` device strings) ships in-tree for tests
//! and the demo daemon. It produces paced BGRA test patterns and claims two
//! stream property options so negotiation has something to choose between.

use anyhow::{bail, Result};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{MemoryPreference, PixelFormat};

/// Opaque identifier for one active video source.
///
/// Immutable once resolved; owned by the session for its lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceHandle {
    pub source_id: String,
    pub group_id: String,
    pub pixel_format_tag: String,
}

/// One (resolution, pixel-format, frame-rate) tuple offered by a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamProperties {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
}

impl StreamProperties {
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Pick the stream properties to negotiate: maximal pixel count, ties broken
/// by source-reported order (first wins). Frame rate is not consulted.
pub fn select_stream_properties(offered: &[StreamProperties]) -> Option<&StreamProperties> {
    let mut best: Option<&StreamProperties> = None;
    for props in offered {
        match best {
            Some(current) if props.pixel_count() <= current.pixel_count() => {}
            _ => best = Some(props),
        }
    }
    best
}

/// A single frame pulled from a reader. The bytes are owned; the reader's
/// backing memory is not referenced past the acquire call.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

/// Filter handed to discovery. Matches the configured device string.
#[derive(Clone, Debug, Default)]
pub struct SourceFilter {
    pub device: String,
}

/// Discovery collaborator contract.
///
/// Returning `None` from `find_source` means no matching hardware exists;
/// the kernel treats that as a normal outcome and no-ops.
pub trait FrameDiscovery: Send + Sync {
    fn find_source(&self, filter: &SourceFilter) -> Option<SourceHandle>;

    fn list_stream_properties(&self, handle: &SourceHandle) -> Vec<StreamProperties>;

    fn open_reader(
        &self,
        handle: &SourceHandle,
        properties: &StreamProperties,
        memory: MemoryPreference,
    ) -> Result<Box<dyn FrameReader>>;
}

/// Non-blocking frame reader over one negotiated stream.
///
/// `try_acquire` returning `Ok(None)` is not an error; it is a normal
/// iteration outcome to be retried.
pub trait FrameReader: Send {
    fn start(&mut self) -> Result<()>;

    fn try_acquire(&mut self) -> Result<Option<RawFrame>>;

    fn stop(&mut self);
}

// ----------------------------------------------------------------------------
// Synthetic backend (stub:// devices)
// ----------------------------------------------------------------------------

/// Synthetic discovery for `stub://` device strings.
///
/// Offers two stream property options (full and half resolution) so
/// negotiation exercises the max-pixel-count selection, and opens paced
/// synthetic readers.
pub struct SyntheticDiscovery {
    width: u32,
    height: u32,
    fps: u32,
}

impl SyntheticDiscovery {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }
}

impl FrameDiscovery for SyntheticDiscovery {
    fn find_source(&self, filter: &SourceFilter) -> Option<SourceHandle> {
        if !filter.device.starts_with("stub://") {
            return None;
        }
        Some(SourceHandle {
            source_id: filter.device.clone(),
            group_id: "synthetic".to_string(),
            pixel_format_tag: "BGRA32".to_string(),
        })
    }

    fn list_stream_properties(&self, _handle: &SourceHandle) -> Vec<StreamProperties> {
        let full = StreamProperties {
            width: self.width,
            height: self.height,
            pixel_format: PixelFormat::Bgra32,
            frame_rate_num: self.fps,
            frame_rate_den: 1,
        };
        let half = StreamProperties {
            width: self.width / 2,
            height: self.height / 2,
            pixel_format: PixelFormat::Bgra32,
            frame_rate_num: self.fps.saturating_mul(2),
            frame_rate_den: 1,
        };
        vec![half, full]
    }

    fn open_reader(
        &self,
        handle: &SourceHandle,
        properties: &StreamProperties,
        _memory: MemoryPreference,
    ) -> Result<Box<dyn FrameReader>> {
        Ok(Box::new(SyntheticReader::new(
            handle.source_id.clone(),
            properties.clone(),
        )))
    }
}

/// Paced synthetic reader. Frames become ready at the negotiated rate;
/// polls in between return `Ok(None)`.
pub struct SyntheticReader {
    device: String,
    properties: StreamProperties,
    started: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticReader {
    fn new(device: String, properties: StreamProperties) -> Self {
        Self {
            device,
            properties,
            started: false,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn frame_interval(&self) -> Duration {
        if self.properties.frame_rate_num == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(
            f64::from(self.properties.frame_rate_den.max(1)) / f64::from(self.properties.frame_rate_num),
        )
    }

    /// Fill a BGRA pattern that varies per frame so downstream change
    /// detection has something to see.
    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.properties.width as usize;
        let height = self.properties.height as usize;
        let mut pixels = vec![0u8; width * height * 4];
        let noise: u8 = rand::random();
        for (i, px) in pixels.chunks_exact_mut(4).enumerate() {
            let x = (i % width) as u64;
            let y = (i / width) as u64;
            px[0] = ((x + self.frame_count) % 256) as u8;
            px[1] = ((y + self.frame_count / 2) % 256) as u8;
            px[2] = noise.wrapping_add((self.frame_count % 256) as u8);
            px[3] = 255;
        }
        pixels
    }
}

impl FrameReader for SyntheticReader {
    fn start(&mut self) -> Result<()> {
        if self.started {
            bail!("synthetic reader already started");
        }
        self.started = true;
        log::info!(
            "SyntheticReader: started on {} ({}x{} @ {}/{})",
            self.device,
            self.properties.width,
            self.properties.height,
            self.properties.frame_rate_num,
            self.properties.frame_rate_den
        );
        Ok(())
    }

    fn try_acquire(&mut self) -> Result<Option<RawFrame>> {
        if !self.started {
            bail!("synthetic reader not started");
        }
        if let Some(last) = self.last_frame_at {
            if last.elapsed() < self.frame_interval() {
                return Ok(None);
            }
        }
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(RawFrame {
            bytes: self.generate_pixels(),
            width: self.properties.width,
            height: self.properties.height,
            pixel_format: self.properties.pixel_format,
        }))
    }

    fn stop(&mut self) {
        if self.started {
            self.started = false;
            log::info!(
                "SyntheticReader: stopped after {} frames on {}",
                self.frame_count,
                self.device
            );
        }
    }
}

/// Discovery that hands out pre-scripted frames. Used by tests that need
/// exact control over what the reader yields.
pub struct ScriptedDiscovery {
    properties: Vec<StreamProperties>,
    frames: Mutex<Vec<Option<RawFrame>>>,
}

impl ScriptedDiscovery {
    /// `frames` is consumed in order; `None` entries simulate "no frame
    /// ready" polls. When the script runs out, the reader keeps returning
    /// `Ok(None)`.
    pub fn new(properties: Vec<StreamProperties>, frames: Vec<Option<RawFrame>>) -> Self {
        let mut frames = frames;
        frames.reverse();
        Self {
            properties,
            frames: Mutex::new(frames),
        }
    }
}

impl FrameDiscovery for ScriptedDiscovery {
    fn find_source(&self, filter: &SourceFilter) -> Option<SourceHandle> {
        Some(SourceHandle {
            source_id: filter.device.clone(),
            group_id: "scripted".to_string(),
            pixel_format_tag: "BGRA32".to_string(),
        })
    }

    fn list_stream_properties(&self, _handle: &SourceHandle) -> Vec<StreamProperties> {
        self.properties.clone()
    }

    fn open_reader(
        &self,
        _handle: &SourceHandle,
        _properties: &StreamProperties,
        _memory: MemoryPreference,
    ) -> Result<Box<dyn FrameReader>> {
        let mut frames = self
            .frames
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted frame queue poisoned"))?;
        Ok(Box::new(ScriptedReader {
            frames: std::mem::take(&mut *frames),
            started: false,
        }))
    }
}

struct ScriptedReader {
    frames: Vec<Option<RawFrame>>,
    started: bool,
}

impl FrameReader for ScriptedReader {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn try_acquire(&mut self) -> Result<Option<RawFrame>> {
        if !self.started {
            bail!("scripted reader not started");
        }
        Ok(self.frames.pop().flatten())
    }

    fn stop(&mut self) {
        self.started = false;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
