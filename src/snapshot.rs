//! File-save fallback.
//!
//! When no real analysis is wanted, the session can run `SnapshotAnalyzer`
//! instead: it persists the current frame as a JPEG and yields the saved
//! path as its result. Encoding/compression concerns stay inside this
//! wrapper; a save failure follows the skip policy (the frame is retried
//! on the next iteration, the loop keeps running).

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;

use crate::convert::ImageView;
use crate::session::FrameAnalyzer;
use crate::ChannelOrder;

const JPEG_QUALITY: u8 = 90;

pub struct SnapshotAnalyzer {
    dir: PathBuf,
    saved: u64,
}

impl SnapshotAnalyzer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            saved: 0,
        }
    }

    fn rgb_bytes(image: &ImageView<'_>) -> Vec<u8> {
        let data = image.data();
        let mut rgb = Vec::with_capacity(
            image.width() as usize * image.height() as usize * 3,
        );
        match image.order() {
            ChannelOrder::Bgr => {
                for px in data.chunks_exact(3) {
                    rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            ChannelOrder::Bgra => {
                for px in data.chunks_exact(4) {
                    rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
        }
        rgb
    }
}

impl FrameAnalyzer for SnapshotAnalyzer {
    type Output = PathBuf;

    fn analyze(&mut self, image: &ImageView<'_>) -> Result<Option<PathBuf>> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create snapshot dir {}", self.dir.display()))?;
        let path = self.dir.join(format!("frame_{:06}.jpg", self.saved));
        let file = fs::File::create(&path)
            .with_context(|| format!("create snapshot {}", path.display()))?;
        let writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(writer, JPEG_QUALITY)
            .write_image(
                &Self::rgb_bytes(image),
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )
            .with_context(|| format!("encode snapshot {}", path.display()))?;
        self.saved += 1;
        log::info!("snapshot saved to {}", path.display());
        Ok(Some(path))
    }
}
