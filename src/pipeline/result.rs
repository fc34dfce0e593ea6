/// Bounding box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// What a pipeline saw in a frame.
///
/// The set of shapes is closed; consumers match on the variant.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Prediction {
    /// Whole-frame classification.
    Label(String),
    /// Labeled object with its location.
    Region { label: String, bounding_box: Rect },
    #[default]
    None,
}

impl Prediction {
    /// Display label, if the prediction carries one.
    pub fn label(&self) -> Option<&str> {
        match self {
            Prediction::Label(label) => Some(label),
            Prediction::Region { label, .. } => Some(label),
            Prediction::None => None,
        }
    }

    pub fn bounding_box(&self) -> Option<Rect> {
        match self {
            Prediction::Region { bounding_box, .. } => Some(*bounding_box),
            _ => None,
        }
    }
}

/// Output of a single `analyze` call, before timing is attached.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Inference {
    pub prediction: Prediction,
    pub confidence: f32,
}

impl Inference {
    pub fn new(prediction: Prediction, confidence: f32) -> Self {
        Self {
            prediction,
            confidence,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Result of analyzing one frame. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisResult {
    prediction: Prediction,
    confidence: f32,
    process_time_ms: u64,
    pipeline: String,
    frame_sequence: u64,
}

impl AnalysisResult {
    /// Confidence is clamped to `[0, 1]`; NaN becomes 0.
    pub fn new(
        inference: Inference,
        process_time_ms: u64,
        pipeline: impl Into<String>,
        frame_sequence: u64,
    ) -> Self {
        Self {
            prediction: inference.prediction,
            confidence: clamp_confidence(inference.confidence),
            process_time_ms,
            pipeline: pipeline.into(),
            frame_sequence,
        }
    }

    pub fn prediction(&self) -> &Prediction {
        &self.prediction
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn process_time_ms(&self) -> u64 {
        self.process_time_ms
    }

    /// Name of the pipeline instance that produced this result.
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Sequence number of the analyzed frame.
    pub fn frame_sequence(&self) -> u64 {
        self.frame_sequence
    }
}

fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
