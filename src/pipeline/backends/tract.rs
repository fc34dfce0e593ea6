#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::frame::InferenceView;
use crate::pipeline::backend::InferencePipeline;
use crate::pipeline::result::{Inference, Prediction};

/// Image classifier backed by a local ONNX model.
///
/// The model takes a `1x3xHxW` f32 tensor in `0..1` and returns one score per
/// class. Scores are softmaxed and the arg-max becomes the label.
pub struct OnnxClassifier {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
    labels: Vec<String>,
}

impl OnnxClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            labels: Vec::new(),
        })
    }

    /// Class names, one per line, in model output order.
    pub fn with_labels_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels from {}", path.display()))?;
        self.labels = raw
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        Ok(self)
    }

    fn build_input(&self, view: &InferenceView<'_>) -> Result<Tensor> {
        if view.width() != self.width || view.height() != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                view.width(),
                view.height(),
                self.width,
                self.height
            ));
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let mut input = tract_ndarray::Array4::<f32>::zeros((1, 3, height, width));
        for (x, y, rgb) in view.rgb_pixels() {
            for (channel, value) in rgb.iter().enumerate() {
                input[[0, channel, y as usize, x as usize]] = *value as f32 / 255.0;
            }
        }

        Ok(input.into_tensor())
    }

    fn label_for(&self, class: usize) -> String {
        self.labels
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("class {}", class))
    }
}

impl InferencePipeline for OnnxClassifier {
    fn name(&self) -> &'static str {
        "onnx-classifier"
    }

    fn analyze(&mut self, view: &InferenceView<'_>) -> Result<Inference> {
        let input = self.build_input(view)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
            return Ok(Inference::none());
        }
        let sum: f32 = scores.iter().map(|s| (s - max).exp()).sum();
        let (class, best) = scores
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |acc, (i, s)| {
                if *s > acc.1 {
                    (i, *s)
                } else {
                    acc
                }
            });
        let confidence = (best - max).exp() / sum;

        Ok(Inference::new(
            Prediction::Label(self.label_for(class)),
            confidence,
        ))
    }
}
