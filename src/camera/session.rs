use std::sync::Arc;

use crate::analyzer::FrameAnalyzer;
use crate::error::Error;

use super::{AspectRatio, BindRequest, CameraProvider, LensFacing, LifecycleOwner, PreviewSink};

/// Binds a camera provider to a frame analyzer and a preview sink.
///
/// `bind` may be retried; every attempt starts by unbinding whatever was bound
/// before. `release` ends the session for good: the provider is unbound and
/// the analyzer closed.
pub struct CameraSession {
    analyzer: Arc<FrameAnalyzer>,
    provider: Box<dyn CameraProvider>,
    preview: Arc<dyn PreviewSink>,
    lens: LensFacing,
    aspect_ratio: AspectRatio,
    bound: bool,
}

impl CameraSession {
    pub fn new(
        analyzer: Arc<FrameAnalyzer>,
        provider: Box<dyn CameraProvider>,
        preview: Arc<dyn PreviewSink>,
    ) -> Self {
        Self {
            analyzer,
            provider,
            preview,
            lens: LensFacing::Back,
            aspect_ratio: AspectRatio::Ratio4x3,
            bound: false,
        }
    }

    pub fn with_lens(mut self, lens: LensFacing) -> Self {
        self.lens = lens;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn analyzer(&self) -> &Arc<FrameAnalyzer> {
        &self.analyzer
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Bind the camera for `host`. Returns false, after logging, when binding
    /// fails; nothing is left bound in that case.
    pub fn bind(&mut self, host: &dyn LifecycleOwner) -> bool {
        match self.try_bind(host) {
            Ok(()) => {
                log::info!(
                    "camera bound for {} (lens={:?}, aspect={:?})",
                    host.label(),
                    self.lens,
                    self.aspect_ratio
                );
                true
            }
            Err(err) => {
                log::error!("use case binding failed: {}", err);
                false
            }
        }
    }

    fn try_bind(&mut self, host: &dyn LifecycleOwner) -> Result<(), Error> {
        self.provider.unbind_all();
        self.bound = false;

        if self.analyzer.is_closed() {
            return Err(Error::BindingFailure("session already released".into()));
        }
        if !host.is_active() {
            return Err(Error::BindingFailure(format!(
                "host {} is not active",
                host.label()
            )));
        }

        let request = BindRequest {
            lens: self.lens,
            aspect_ratio: self.aspect_ratio,
            preview: self.preview.clone(),
            frames: self.analyzer.frame_sink(),
        };
        if let Err(err) = self.provider.bind(request) {
            self.provider.unbind_all();
            return Err(Error::BindingFailure(format!("{:#}", err)));
        }
        self.bound = true;
        Ok(())
    }

    /// Unbind the camera and close the analyzer. Once this returns the
    /// analyzer receives no more frames. Idempotent.
    pub fn release(&mut self) {
        self.provider.unbind_all();
        if self.bound {
            log::info!("camera unbound");
        }
        self.bound = false;
        self.analyzer.close();
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release();
    }
}
