//! Capture session state machine.
//!
//! A session owns one open source and its reader lifecycle: create → start
//! → read loop → stop → dispose. States are strictly sequential and Closed
//! is terminal; a closed session cannot restart, matching the underlying
//! source's lifecycle limits. Construct a new session instead.

use anyhow::Result;
use std::sync::Arc;

use crate::convert::{FrameConverter, ImageView};
use crate::source::{
    select_stream_properties, FrameDiscovery, FrameReader, RawFrame, SourceHandle,
    StreamProperties,
};
use crate::{CaptureError, ChannelOrder, MemoryPreference, SkipReason};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Starting,
    Streaming,
    Stopping,
    Closed,
}

/// Per-frame processing outcome.
///
/// Replaces a swallow-all catch with an explicit result so callers and
/// tests can assert on skip reasons. `Absent` is the sentinel for "the
/// analyzer ran and produced nothing" and is distinct from an error.
#[derive(Debug)]
pub enum FrameOutcome<T> {
    Produced(T),
    Absent,
    Skipped(SkipReason),
}

impl<T> FrameOutcome<T> {
    pub fn is_produced(&self) -> bool {
        matches!(self, FrameOutcome::Produced(_))
    }
}

/// Caller-supplied analysis strategy.
///
/// Obligations on implementations:
/// - MUST NOT retain the `ImageView` past the call (the borrow enforces
///   this; the backing buffer is reused on the next frame).
/// - SHOULD NOT panic; a failure is an `Err`, which skips the frame. The
///   loop has no internal timeout on this call.
pub trait FrameAnalyzer {
    type Output;

    fn analyze(&mut self, image: &ImageView<'_>) -> Result<Option<Self::Output>>;
}

/// Blanket impl so plain closures can serve as analyzers.
impl<T, F> FrameAnalyzer for F
where
    F: FnMut(&ImageView<'_>) -> Result<Option<T>>,
{
    type Output = T;

    fn analyze(&mut self, image: &ImageView<'_>) -> Result<Option<T>> {
        self(image)
    }
}

/// Session counters, logged on stop.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub frames_skipped: u64,
}

pub struct CaptureSession {
    discovery: Arc<dyn FrameDiscovery>,
    memory: MemoryPreference,
    converter: FrameConverter,
    state: SessionState,
    handle: Option<SourceHandle>,
    properties: Option<StreamProperties>,
    reader: Option<Box<dyn FrameReader>>,
    stats: SessionStats,
}

impl CaptureSession {
    pub fn new(
        discovery: Arc<dyn FrameDiscovery>,
        order: ChannelOrder,
        memory: MemoryPreference,
    ) -> Self {
        Self {
            discovery,
            memory,
            converter: FrameConverter::new(order),
            state: SessionState::Unopened,
            handle: None,
            properties: None,
            reader: None,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Stream properties negotiated at start. `None` before Streaming.
    pub fn properties(&self) -> Option<&StreamProperties> {
        self.properties.as_ref()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Negotiate stream properties for `handle`, open and start a reader.
    ///
    /// Fails with `SourceUnavailable` when no handle is supplied and
    /// `NegotiationFailed` when the source offers zero property options.
    /// Resources are released on every exit path, including a partially
    /// failed start; any failure leaves the session Closed.
    pub fn start(&mut self, handle: Option<SourceHandle>) -> Result<(), CaptureError> {
        if self.state != SessionState::Unopened {
            return Err(CaptureError::InvalidState {
                expected: SessionState::Unopened,
                actual: self.state,
            });
        }
        self.state = SessionState::Starting;
        match self.start_inner(handle) {
            Ok(()) => {
                self.state = SessionState::Streaming;
                Ok(())
            }
            Err(err) => {
                self.stop();
                Err(err)
            }
        }
    }

    fn start_inner(&mut self, handle: Option<SourceHandle>) -> Result<(), CaptureError> {
        let handle = handle.ok_or(CaptureError::SourceUnavailable)?;
        let offered = self.discovery.list_stream_properties(&handle);
        let properties = select_stream_properties(&offered)
            .ok_or(CaptureError::NegotiationFailed)?
            .clone();
        let mut reader = self
            .discovery
            .open_reader(&handle, &properties, self.memory)
            .map_err(CaptureError::Reader)?;
        reader.start().map_err(CaptureError::Reader)?;
        log::info!(
            "CaptureSession: streaming {} at {}x{} ({:?}, {:?} memory)",
            handle.source_id,
            properties.width,
            properties.height,
            properties.pixel_format,
            self.memory,
        );
        self.handle = Some(handle);
        self.properties = Some(properties);
        self.reader = Some(reader);
        Ok(())
    }

    /// Non-blocking poll for the next frame. `Ok(None)` means no frame is
    /// ready yet; retry next iteration.
    pub fn try_acquire_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        if self.state != SessionState::Streaming {
            return Err(CaptureError::InvalidState {
                expected: SessionState::Streaming,
                actual: self.state,
            });
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(CaptureError::InvalidState {
                expected: SessionState::Streaming,
                actual: self.state,
            });
        };
        reader.try_acquire().map_err(CaptureError::Reader)
    }

    /// Convert one frame and run the analyzer on it.
    ///
    /// Conversion errors and analyzer errors are absorbed here as skips: a
    /// single bad frame must not terminate acquisition.
    pub fn process_one_frame<A: FrameAnalyzer>(
        &mut self,
        frame: &RawFrame,
        analyzer: &mut A,
    ) -> FrameOutcome<A::Output> {
        let view = match self.converter.convert(
            &frame.bytes,
            frame.width,
            frame.height,
            frame.pixel_format,
        ) {
            Ok(view) => view,
            Err(err) => {
                self.stats.frames_skipped += 1;
                return FrameOutcome::Skipped(SkipReason::UnsupportedFormat(err));
            }
        };
        match analyzer.analyze(&view) {
            Ok(Some(result)) => {
                self.stats.frames_processed += 1;
                FrameOutcome::Produced(result)
            }
            Ok(None) => {
                self.stats.frames_processed += 1;
                FrameOutcome::Absent
            }
            Err(err) => {
                self.stats.frames_skipped += 1;
                FrameOutcome::Skipped(SkipReason::Analysis(err))
            }
        }
    }

    /// Stop streaming and release the reader and source handle.
    ///
    /// Idempotent; safe to call from any state, and drives Stopping →
    /// Closed deterministically.
    pub fn stop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Stopping;
        if let Some(mut reader) = self.reader.take() {
            reader.stop();
        }
        self.handle = None;
        self.properties = None;
        self.state = SessionState::Closed;
        log::info!(
            "CaptureSession: closed ({} processed, {} skipped)",
            self.stats.frames_processed,
            self.stats.frames_skipped
        );
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Brightness analyzer
// ----------------------------------------------------------------------------

/// Simple built-in analyzer: reports the mean pixel value when it crosses
/// a threshold. Good enough for the demo daemon and for wiring checks.
pub struct BrightnessAnalyzer {
    threshold: u8,
}

impl BrightnessAnalyzer {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }
}

impl FrameAnalyzer for BrightnessAnalyzer {
    type Output = u8;

    fn analyze(&mut self, image: &ImageView<'_>) -> Result<Option<u8>> {
        let data = image.data();
        if data.is_empty() {
            return Ok(None);
        }
        let sum: u64 = data.iter().map(|&b| u64::from(b)).sum();
        let mean = (sum / data.len() as u64) as u8;
        if mean >= self.threshold {
            Ok(Some(mean))
        } else {
            Ok(None)
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
