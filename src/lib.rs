//! Live Frame Analyzer
//!
//! Runs a user-selected inference pipeline over a live camera stream and
//! delivers one result per analyzed frame.
//!
//! # Architecture
//!
//! The analyzer keeps three promises:
//!
//! 1. **Drop-latest backpressure**: at most one frame waits while another is
//!    analyzed. A newer frame displaces the waiting one; the producer never
//!    blocks on inference.
//! 2. **Serialized analysis**: frames are analyzed strictly one at a time on a
//!    dedicated thread, and every completed analysis yields one callback.
//! 3. **Safe hot swap**: changing the pipeline never disturbs an analysis in
//!    progress, and every replaced instance is released exactly once.
//!
//! # Module Structure
//!
//! - `frame`: Owned frames and the borrowed `InferenceView` pipelines see
//! - `pipeline`: Pipeline trait, result types, registry, built-in backends
//! - `analyzer`: `FrameAnalyzer`, the single-slot scheduler
//! - `camera`: Provider boundary, `CameraSession`, synthetic `stub://` camera
//! - `display`: Result mailbox and overlay model for the presentation side
//! - `config`: File and environment configuration

pub mod analyzer;
pub mod camera;
pub mod config;
pub mod display;
pub mod error;
pub mod frame;
pub mod pipeline;

pub use analyzer::{
    ActiveSelection, AnalyzerOptions, AnalyzerStats, DrainPolicy, FrameAnalyzer, FrameSink,
    ResultSink,
};
pub use camera::{
    AspectRatio, BindRequest, CameraProvider, CameraSession, CountingPreview, HostLifecycle,
    LensFacing, LifecycleOwner, PreviewSink, SyntheticCamera,
};
pub use config::{resolve_pipeline, AnalyzerConfig};
pub use display::{result_mailbox, DisplayModel, MailboxReceiver, Overlay, Received, ResultMailbox};
pub use error::Error;
pub use frame::{Frame, InferenceView, PixelFormat};
pub use pipeline::{
    AnalysisResult, Inference, InferencePipeline, PipelineRegistry, Prediction, Rect,
};
