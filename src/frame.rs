//! Decoded camera frames.
//!
//! - `Frame`: owned pixel buffer. Bytes are private; there is no `Clone`.
//! - `InferenceView`: borrowed view handed to pipelines for the duration of one
//!   `analyze` call. It cannot outlive the frame it was taken from.
//!
//! A frame is moved from the camera into the analyzer and dropped exactly once,
//! either after it has been analyzed or when a newer frame displaces it.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

/// Pixel layout of a frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// One decoded image sample from a camera.
// Not Clone: the analyzer holds at most one pending and one in-flight frame.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Per-source sequence number, starting at 1.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Wrap a decoded buffer. Fails if the length does not match the dimensions.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} bytes for {}x{} {:?}, received {}",
                expected,
                width,
                height,
                format,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Pipelines get a restricted view for the duration of one analysis.
    pub fn inference_view(&self) -> InferenceView<'_> {
        InferenceView { frame: self }
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Time since capture.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Borrowed view of a frame for inference.
pub struct InferenceView<'a> {
    frame: &'a Frame,
}

impl<'a> InferenceView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn format(&self) -> PixelFormat {
        self.frame.format
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }

    /// Raw pixel bytes, row-major. Valid only while the view is.
    pub fn pixels(&self) -> &'a [u8] {
        let frame: &'a Frame = self.frame;
        &frame.data
    }

    /// Iterate pixels as `(x, y, [r, g, b])`, converting from the frame format.
    pub fn rgb_pixels(&self) -> impl Iterator<Item = (u32, u32, [u8; 3])> + 'a {
        let frame: &'a Frame = self.frame;
        let width = frame.width.max(1);
        let format = frame.format;
        frame
            .data
            .chunks_exact(format.bytes_per_pixel())
            .enumerate()
            .map(move |(i, px)| {
                let i = i as u32;
                let rgb = match format {
                    PixelFormat::Rgb8 | PixelFormat::Rgba8 => [px[0], px[1], px[2]],
                    PixelFormat::Gray8 => [px[0], px[0], px[0]],
                };
                (i % width, i / width, rgb)
            })
    }
}

/// Rec. 601 luma of an RGB triple.
pub fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}
