use anyhow::Result;

use crate::frame::InferenceView;
use crate::pipeline::result::Inference;

/// A swappable unit that maps a frame to a prediction and confidence.
///
/// # Contract
///
/// - `analyze` is synchronous and runs on the analyzer thread only; the
///   analyzer never calls it concurrently on the same instance.
/// - `analyze` must not retain the pixel slice beyond the call.
/// - `release` is called exactly once, after the last `analyze` has returned.
///   Instances that own external resources free them there.
pub trait InferencePipeline: Send {
    /// Pipeline identifier.
    fn name(&self) -> &'static str;

    /// Run inference on a frame.
    fn analyze(&mut self, view: &InferenceView<'_>) -> Result<Inference>;

    /// Optional warm-up hook, run before the instance becomes active.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Optional release hook.
    fn release(&mut self) {}
}
