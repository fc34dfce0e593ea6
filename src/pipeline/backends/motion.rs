use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::frame::InferenceView;
use crate::pipeline::backend::InferencePipeline;
use crate::pipeline::result::{Inference, Prediction};

const MOTION_CONFIDENCE: f32 = 0.85;

/// Frame-difference pipeline. Reports motion when the pixel hash changes.
#[derive(Default)]
pub struct MotionPipeline {
    last_hash: Option<[u8; 32]>,
}

impl MotionPipeline {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InferencePipeline for MotionPipeline {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn analyze(&mut self, view: &InferenceView<'_>) -> Result<Inference> {
        let current_hash: [u8; 32] = Sha256::digest(view.pixels()).into();

        let motion = self.last_hash.is_some_and(|prev| prev != current_hash);

        self.last_hash = Some(current_hash);

        if motion {
            Ok(Inference::new(
                Prediction::Label("motion".to_string()),
                MOTION_CONFIDENCE,
            ))
        } else {
            Ok(Inference::none())
        }
    }

    fn release(&mut self) {
        self.last_hash = None;
    }
}
