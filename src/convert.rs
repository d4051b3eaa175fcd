//! Scratch-buffer pixel conversion.
//!
//! `FrameConverter` turns a raw packed-BGRA frame into an `ImageView` that
//! analyzers can read. Every incoming frame is copied into a reusable
//! scratch buffer first, decoupling the view from the reader's backing
//! memory, whose lifetime the kernel does not control past the acquire call.
//!
//! Buffer reuse invariant: the scratch buffer is allocated on the first
//! frame and its identity is stable across frames at the same resolution.
//! A resolution change reallocates it and re-establishes the invariant.

use rayon::prelude::*;
use thiserror::Error;

use crate::{ChannelOrder, PixelFormat};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    /// The buffer length does not match the packed stride of the declared
    /// format. Caught at the frame level; the loop continues.
    #[error(
        "expected {expected} bytes for {width}x{height} {format:?}, got {actual}"
    )]
    UnsupportedFormat {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("frame dimensions {width}x{height} overflow")]
    DimensionsOverflow { width: u32, height: u32 },
}

/// Image view over a converter's internal buffer.
///
/// The borrow ties the view to the converter: it is valid only until the
/// next `convert` call. Callers needing persistence must copy.
#[derive(Debug)]
pub struct ImageView<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    order: ChannelOrder,
}

impl<'a> ImageView<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    /// Channel bytes of the pixel at (x, y), or `None` out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&'a [u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.order.channels();
        let idx = (y as usize * self.width as usize + x as usize) * channels;
        self.data.get(idx..idx + channels)
    }
}

/// Converts raw BGRA frames into reusable-buffer image views.
///
/// One converter is bound to one session; the scratch buffer is exclusively
/// owned and its reuse is valid because exactly one iteration is in flight
/// at a time.
pub struct FrameConverter {
    order: ChannelOrder,
    /// Packed BGRA copy of the current frame, `4 * width * height`.
    scratch: Vec<u8>,
    /// Reduced 3-channel buffer backing BGR views. Same reuse rule.
    reduced: Vec<u8>,
}

impl FrameConverter {
    pub fn new(order: ChannelOrder) -> Self {
        Self {
            order,
            scratch: Vec::new(),
            reduced: Vec::new(),
        }
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    /// Copy `bytes` into the scratch buffer and return a view in the
    /// converter's channel order.
    pub fn convert(
        &mut self,
        bytes: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<ImageView<'_>, ConvertError> {
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or(ConvertError::DimensionsOverflow { width, height })?;
        let expected = pixels
            .checked_mul(format.bytes_per_pixel())
            .ok_or(ConvertError::DimensionsOverflow { width, height })?;
        if bytes.len() != expected {
            return Err(ConvertError::UnsupportedFormat {
                width,
                height,
                format,
                expected,
                actual: bytes.len(),
            });
        }

        if self.scratch.len() != expected {
            log::debug!(
                "FrameConverter: sizing scratch buffer to {} bytes ({}x{})",
                expected,
                width,
                height
            );
            self.scratch = vec![0u8; expected];
        }
        self.scratch.copy_from_slice(bytes);

        let data: &[u8] = match self.order {
            ChannelOrder::Bgra => &self.scratch,
            ChannelOrder::Bgr => {
                let reduced_len = pixels * 3;
                if self.reduced.len() != reduced_len {
                    self.reduced = vec![0u8; reduced_len];
                }
                if pixels > 0 {
                    let src_row = width as usize * 4;
                    let dst_row = width as usize * 3;
                    // Per-row independence, no cross-pixel dependency: safe
                    // to split across worker threads.
                    self.reduced
                        .par_chunks_mut(dst_row)
                        .zip(self.scratch.par_chunks(src_row))
                        .for_each(|(dst, src)| {
                            for (px_out, px_in) in
                                dst.chunks_exact_mut(3).zip(src.chunks_exact(4))
                            {
                                px_out.copy_from_slice(&px_in[..3]);
                            }
                        });
                }
                &self.reduced
            }
        };

        Ok(ImageView {
            data,
            width,
            height,
            order: self.order,
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
