pub mod bright_region;
pub mod color;
pub mod motion;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use bright_region::BrightRegionDetector;
pub use color::ColorClassifier;
pub use motion::MotionPipeline;

#[cfg(feature = "backend-tract")]
pub use tract::OnnxClassifier;
