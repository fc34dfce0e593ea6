use anyhow::{anyhow, Result};

use crate::frame::InferenceView;
use crate::pipeline::backend::InferencePipeline;
use crate::pipeline::result::{Inference, Prediction};

const LABELS: [&str; 4] = ["red", "green", "blue", "gray"];

/// Pixels whose channel spread is below this count as gray.
const GRAY_SPREAD: u8 = 24;

/// Whole-frame classifier over a coarse dominant-channel histogram.
pub struct ColorClassifier {
    sample_step: usize,
}

impl ColorClassifier {
    pub fn new() -> Self {
        Self { sample_step: 4 }
    }

    /// Sample every `step`-th pixel. `step` is clamped to at least 1.
    pub fn with_sample_step(mut self, step: usize) -> Self {
        self.sample_step = step.max(1);
        self
    }
}

impl Default for ColorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn bucket([r, g, b]: [u8; 3]) -> usize {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max - min < GRAY_SPREAD {
        3
    } else if max == r {
        0
    } else if max == g {
        1
    } else {
        2
    }
}

impl InferencePipeline for ColorClassifier {
    fn name(&self) -> &'static str {
        "color-classifier"
    }

    fn analyze(&mut self, view: &InferenceView<'_>) -> Result<Inference> {
        let mut histogram = [0u32; 4];
        for (_, _, rgb) in view.rgb_pixels().step_by(self.sample_step) {
            histogram[bucket(rgb)] += 1;
        }

        let total: u32 = histogram.iter().sum();
        if total == 0 {
            return Err(anyhow!("empty frame"));
        }

        let (winner, count) = histogram
            .iter()
            .enumerate()
            .max_by_key(|(_, count)| **count)
            .map(|(i, c)| (i, *c))
            .unwrap_or((3, 0));

        Ok(Inference::new(
            Prediction::Label(LABELS[winner].to_string()),
            count as f32 / total as f32,
        ))
    }
}
