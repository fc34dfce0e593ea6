//! Camera binding.
//!
//! The capture subsystem is external. This module defines the boundary it is
//! driven through:
//! - `CameraProvider`: something that can bind a camera and push frames;
//! - `PreviewSink`: where preview frames go (the viewfinder);
//! - `LifecycleOwner`: the host whose lifetime scopes a session.
//!
//! `CameraSession` wires a provider to a `FrameAnalyzer`. `SyntheticCamera`
//! is a provider for `stub://` sources, used by the daemon and the tests.
//!
//! Providers MUST NOT:
//! - Deliver frames after `unbind_all` has returned
//! - Retain frames after handing them to the frame sink

mod session;
pub mod synthetic;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;

use crate::analyzer::FrameSink;
use crate::frame::InferenceView;

pub use session::CameraSession;
pub use synthetic::{SyntheticCamera, SyntheticStats};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    #[default]
    Back,
    Front,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AspectRatio {
    #[default]
    Ratio4x3,
    Ratio16x9,
}

/// Receives every captured frame before it is handed to the analyzer.
pub trait PreviewSink: Send + Sync {
    fn on_preview(&self, view: &InferenceView<'_>);
}

/// Preview sink that only counts frames.
#[derive(Debug, Default)]
pub struct CountingPreview {
    frames: AtomicU64,
}

impl CountingPreview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl PreviewSink for CountingPreview {
    fn on_preview(&self, _view: &InferenceView<'_>) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Host whose lifetime scopes a camera session.
pub trait LifecycleOwner {
    fn label(&self) -> &str;

    /// Only active hosts may bind a camera.
    fn is_active(&self) -> bool;
}

/// Minimal lifecycle owner driven by explicit `start`/`stop` calls.
#[derive(Debug)]
pub struct HostLifecycle {
    label: String,
    active: AtomicBool,
}

impl HostLifecycle {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            active: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl LifecycleOwner for HostLifecycle {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Everything a provider needs to start producing frames.
pub struct BindRequest {
    pub lens: LensFacing,
    pub aspect_ratio: AspectRatio,
    pub preview: Arc<dyn PreviewSink>,
    pub frames: FrameSink,
}

/// External frame-producing subsystem.
pub trait CameraProvider: Send {
    /// Start delivering frames to `request.frames` and `request.preview`.
    ///
    /// Fails on binding conflicts or unsupported configurations. A failed bind
    /// leaves nothing bound.
    fn bind(&mut self, request: BindRequest) -> Result<()>;

    /// Stop all delivery. Idempotent.
    fn unbind_all(&mut self);

    fn is_bound(&self) -> bool;
}
