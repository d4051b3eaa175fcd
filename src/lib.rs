//! Camera capture kernel.
//!
//! This crate implements a generic frame-acquisition/processing loop: it
//! pulls frames from a live video source, converts each frame's pixel buffer
//! into a processable image view, hands the view to a caller-supplied
//! analysis function, and reports results (or timeout) through callbacks.
//!
//! # Architecture
//!
//! The kernel maintains four invariants by construction:
//!
//! 1. **Buffer reuse**: one scratch pixel buffer per session, allocated on
//!    the first frame and stable across frames at the same resolution.
//! 2. **Frame isolation**: a single bad frame (bad stride, failing analyzer)
//!    is skipped with a reason; it never terminates acquisition.
//! 3. **Sequential lifecycle**: a session moves Unopened → Starting →
//!    Streaming → Stopping → Closed exactly once; Closed is terminal.
//! 4. **Cooperative cancellation**: the stop signal is observed once per
//!    iteration and never interrupts an in-flight analysis call.
//!
//! # Module Structure
//!
//! - `source`: source handles, stream properties, discovery/reader traits
//! - `convert`: scratch-buffer pixel conversion (BGRA32 → BGR/BGRA views)
//! - `session`: the capture session state machine
//! - `controller`: timeout/repeat/stop policy over the raw poll loop
//! - `capture`: facade + background worker handle
//! - `snapshot`: file-save fallback analyzer
//! - `config`: file + environment configuration

use serde::Deserialize;
use thiserror::Error;

pub mod capture;
pub mod config;
pub mod controller;
pub mod convert;
pub mod session;
pub mod snapshot;
pub mod source;

pub use capture::{CameraCapture, CaptureHandle};
pub use config::{CaptureConfig, ProcessingSettings, SourceSettings};
pub use controller::{LoopController, LoopOptions, LoopOutcome};
pub use convert::{ConvertError, FrameConverter, ImageView};
pub use session::{
    BrightnessAnalyzer, CaptureSession, FrameAnalyzer, FrameOutcome, SessionState, SessionStats,
};
pub use snapshot::SnapshotAnalyzer;
pub use source::{
    select_stream_properties, FrameDiscovery, FrameReader, RawFrame, ScriptedDiscovery,
    SourceFilter, SourceHandle, StreamProperties, SyntheticDiscovery,
};

// -------------------- Shared pixel/config enums --------------------

/// Pixel layout of raw frames entering the kernel.
///
/// Only packed 4-byte BGRA is negotiated; any other stride is rejected at
/// conversion time, per frame.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Bgra32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
        }
    }
}

/// Where the source should place frame buffers. The kernel only processes
/// CPU-addressable buffers; `Gpu` is forwarded to the reader as a hint.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPreference {
    #[default]
    Cpu,
    Gpu,
}

/// Channel order of the image view handed to analyzers.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    /// 3-channel, alpha dropped per pixel.
    #[default]
    Bgr,
    /// 4-channel, the scratch copy as-is.
    Bgra,
}

impl ChannelOrder {
    pub fn channels(self) -> usize {
        match self {
            ChannelOrder::Bgr => 3,
            ChannelOrder::Bgra => 4,
        }
    }
}

// -------------------- Error taxonomy --------------------

/// Setup-time capture errors. These are the only errors a caller of
/// `CameraCapture::start_processing` observes; per-frame failures surface
/// as skipped frames instead.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No matching source handle was supplied or discovered.
    #[error("no capture source available")]
    SourceUnavailable,

    /// The source offered zero stream property options.
    #[error("source offered no usable stream properties")]
    NegotiationFailed,

    /// A loop is already active; concurrent loops would contend for the
    /// same source and the same scratch buffer.
    #[error("a capture loop is already running")]
    AlreadyRunning,

    /// An operation was invoked in the wrong session state.
    #[error("session is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    /// The underlying reader failed to open, start, or acquire.
    #[error("frame reader failure: {0}")]
    Reader(anyhow::Error),

    /// The background worker thread panicked.
    #[error("capture worker thread panicked")]
    WorkerPanic,
}

/// Why a frame was skipped. Per-frame failures are absorbed at the frame
/// level; the reason is kept so callers and tests can assert on it.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(#[from] ConvertError),

    #[error("analysis failed: {0}")]
    Analysis(anyhow::Error),
}
