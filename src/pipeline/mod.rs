//! Inference pipelines and the registry they are selected from.

mod backend;
pub mod backends;
mod registry;
mod result;

pub use backend::InferencePipeline;
pub use backends::{BrightRegionDetector, ColorClassifier, MotionPipeline};
pub use registry::{PipelineFactory, PipelineRegistry};
pub use result::{AnalysisResult, Inference, Prediction, Rect};

#[cfg(feature = "backend-tract")]
pub use backends::OnnxClassifier;
