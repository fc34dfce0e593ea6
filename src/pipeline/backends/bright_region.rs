use anyhow::Result;

use crate::frame::{luma, InferenceView};
use crate::pipeline::backend::InferencePipeline;
use crate::pipeline::result::{Inference, Prediction, Rect};

const DEFAULT_LUMA_THRESHOLD: u8 = 200;

/// Single-object detector: boxes the pixels brighter than a luma threshold.
///
/// Confidence is the fraction of bright pixels inside the box, so a compact
/// blob scores high and scattered highlights score low.
pub struct BrightRegionDetector {
    threshold: u8,
}

impl BrightRegionDetector {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_LUMA_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }
}

impl Default for BrightRegionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl InferencePipeline for BrightRegionDetector {
    fn name(&self) -> &'static str {
        "bright-region-detector"
    }

    fn analyze(&mut self, view: &InferenceView<'_>) -> Result<Inference> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        let mut bright = 0u64;

        for (x, y, rgb) in view.rgb_pixels() {
            if luma(rgb) < self.threshold {
                continue;
            }
            bright += 1;
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }

        let Some((x0, y0, x1, y1)) = bounds else {
            return Ok(Inference::none());
        };

        let bounding_box = Rect::new(x0 as f32, y0 as f32, (x1 + 1) as f32, (y1 + 1) as f32);
        let confidence = bright as f32 / bounding_box.area();

        Ok(Inference::new(
            Prediction::Region {
                label: "bright".to_string(),
                bounding_box,
            },
            confidence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, PixelFormat};

    fn gray_frame(width: u32, height: u32, lit: &[(u32, u32)]) -> Frame {
        let mut data = vec![20u8; (width * height) as usize];
        for &(x, y) in lit {
            data[(y * width + x) as usize] = 250;
        }
        Frame::new(data, width, height, PixelFormat::Gray8, 1).unwrap()
    }

    #[test]
    fn dark_frame_has_no_detection() {
        let frame = gray_frame(6, 6, &[]);
        let out = BrightRegionDetector::new()
            .analyze(&frame.inference_view())
            .unwrap();
        assert_eq!(out, Inference::none());
    }

    #[test]
    fn boxes_a_compact_blob() {
        let frame = gray_frame(8, 8, &[(2, 3), (3, 3), (2, 4), (3, 4)]);
        let out = BrightRegionDetector::new()
            .analyze(&frame.inference_view())
            .unwrap();

        assert_eq!(out.prediction.label(), Some("bright"));
        assert_eq!(
            out.prediction.bounding_box(),
            Some(Rect::new(2.0, 3.0, 4.0, 5.0))
        );
        assert_eq!(out.confidence, 1.0);
    }

    #[test]
    fn scattered_highlights_score_low() {
        let frame = gray_frame(8, 8, &[(0, 0), (7, 7)]);
        let out = BrightRegionDetector::new()
            .analyze(&frame.inference_view())
            .unwrap();

        assert_eq!(
            out.prediction.bounding_box(),
            Some(Rect::new(0.0, 0.0, 8.0, 8.0))
        );
        assert!(out.confidence < 0.05);
    }
}
