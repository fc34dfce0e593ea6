//! Frame analyzer: single-slot, drop-latest analysis of a live frame stream.
//!
//! One dedicated thread analyzes frames strictly one at a time. Producers hand
//! frames in through `on_frame`, which never waits on inference:
//!
//! - analysis thread idle: the frame is picked up immediately;
//! - analysis thread busy: the frame replaces the one waiting in the pending
//!   slot, and the displaced frame is dropped unanalyzed.
//!
//! At most one frame is pending and one in flight, so the analyzer always
//! converges on the freshest frame instead of falling permanently behind.
//!
//! The active pipeline lives in a slot holding an `Arc`. Each analysis clones
//! the `Arc` when it starts, so a selection change never affects an analysis
//! already running, and the previous instance is released by whichever side
//! drops the last reference: the slot on swap, or the in-flight analysis when
//! it finishes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::pipeline::{AnalysisResult, Inference, InferencePipeline, PipelineRegistry};

/// What `close()` does with an analysis that is still running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainPolicy {
    /// Block until the in-flight analysis has finished and its result has been
    /// delivered.
    #[default]
    Wait,
    /// Return immediately. The in-flight analysis still runs to completion on
    /// the analysis thread, but its result is discarded.
    Abandon,
}

impl std::str::FromStr for DrainPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(DrainPolicy::Wait),
            "abandon" => Ok(DrainPolicy::Abandon),
            other => Err(anyhow::anyhow!(
                "unknown drain policy '{}' (expected wait or abandon)",
                other
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AnalyzerOptions {
    pub drain_policy: DrainPolicy,
    /// Deliver `None` for frames that arrive while no pipeline is selected.
    /// When false such frames produce no callback at all.
    pub deliver_absent_results: bool,
    /// Consecutive dropped frames before a falling-behind warning is logged.
    pub lag_warn_frames: u64,
    /// Analyses slower than this are logged at warn level.
    pub slow_analysis_warn: Option<Duration>,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            drain_policy: DrainPolicy::Wait,
            deliver_absent_results: true,
            lag_warn_frames: 30,
            slow_analysis_warn: Some(Duration::from_millis(500)),
        }
    }
}

/// Receives analysis results on the analysis thread.
///
/// Called exactly once per completed analysis. `None` means no pipeline was
/// selected for that frame. Implementations that feed a UI must marshal onto
/// their own thread; see `ResultMailbox`.
pub trait ResultSink: Send + 'static {
    fn on_result(&mut self, result: Option<AnalysisResult>);
}

impl<F> ResultSink for F
where
    F: FnMut(Option<AnalysisResult>) + Send + 'static,
{
    fn on_result(&mut self, result: Option<AnalysisResult>) {
        self(result)
    }
}

/// Counters snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnalyzerStats {
    pub frames_received: u64,
    /// Frames that produced a result from a pipeline.
    pub frames_analyzed: u64,
    /// Frames taken by the analysis thread while no pipeline was selected.
    pub frames_without_pipeline: u64,
    /// Frames displaced from the pending slot or abandoned on close.
    pub frames_dropped: u64,
    /// Frames offered after close.
    pub frames_rejected: u64,
    pub analysis_failures: u64,
    /// Analyses that exceeded `slow_analysis_warn`.
    pub slow_analyses: u64,
    pub results_delivered: u64,
    /// Callbacks that panicked. The result is lost; the analyzer keeps running.
    pub sink_failures: u64,
    /// Frames currently waiting (0 or 1).
    pub pending: usize,
    /// True while drops since the analyzer last kept up exceed the lag threshold.
    pub lagging: bool,
}

/// Index and registry name of the active pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveSelection {
    pub index: usize,
    pub name: String,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    analyzed: AtomicU64,
    unselected: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    failures: AtomicU64,
    slow: AtomicU64,
    delivered: AtomicU64,
    sink_failures: AtomicU64,
}

#[derive(Default)]
struct FrameSlot {
    pending: Option<Frame>,
    closed: bool,
    /// Drops since the last handoff.
    drops_since_handoff: u64,
    /// Drops since the last handoff that followed no drops at all. Sustained
    /// overload keeps this growing across analyses.
    backlog_drops: u64,
    lagging: bool,
}

impl FrameSlot {
    fn take_pending(&mut self) -> Option<Frame> {
        let frame = self.pending.take()?;
        if self.drops_since_handoff == 0 {
            if self.lagging {
                log::info!(
                    "analysis caught up after {} dropped frames",
                    self.backlog_drops
                );
            }
            self.backlog_drops = 0;
            self.lagging = false;
        }
        self.drops_since_handoff = 0;
        Some(frame)
    }
}

/// A selected pipeline instance. Released when the last reference goes away.
struct ActivePipeline {
    index: usize,
    name: String,
    /// Never contended: `run` is only called from the analysis thread, which
    /// handles one frame at a time, and `Drop` has exclusive access. The lock
    /// only makes the instance shareable through `Arc`.
    instance: Mutex<Box<dyn InferencePipeline>>,
}

impl ActivePipeline {
    fn run(&self, frame: &Frame) -> Result<Inference> {
        let mut instance = self.instance.try_lock().map_err(|_| Error::AnalysisFailure {
            pipeline: self.name.clone(),
            reason: "pipeline instance unavailable".to_string(),
        })?;
        let view = frame.inference_view();
        match panic::catch_unwind(AssertUnwindSafe(|| instance.analyze(&view))) {
            Ok(Ok(inference)) => Ok(inference),
            Ok(Err(err)) => Err(Error::AnalysisFailure {
                pipeline: self.name.clone(),
                reason: format!("{:#}", err),
            }),
            Err(payload) => Err(Error::AnalysisFailure {
                pipeline: self.name.clone(),
                reason: format!("panicked: {}", panic_message(payload.as_ref())),
            }),
        }
    }
}

impl Drop for ActivePipeline {
    fn drop(&mut self) {
        let instance = self
            .instance
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        match panic::catch_unwind(AssertUnwindSafe(|| instance.release())) {
            Ok(()) => log::info!("released pipeline #{} ({})", self.index, self.name),
            Err(payload) => log::error!(
                "pipeline #{} ({}) panicked during release: {}",
                self.index,
                self.name,
                panic_message(payload.as_ref())
            ),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// Only the sink lock is ever held across user code; a poisoned guard is
// recovered rather than propagated.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    slot: Mutex<FrameSlot>,
    wake: Condvar,
    active: Mutex<Option<Arc<ActivePipeline>>>,
    sink: Mutex<Option<Box<dyn ResultSink>>>,
    counters: Counters,
    options: AnalyzerOptions,
}

impl Shared {
    fn submit(&self, frame: Frame) {
        let displaced = {
            let mut slot = lock(&self.slot);
            if slot.closed {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                log::trace!("frame #{} rejected: analyzer closed", frame.sequence);
                return;
            }
            self.counters.received.fetch_add(1, Ordering::Relaxed);
            let displaced = slot.pending.replace(frame);
            if displaced.is_some() {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                slot.drops_since_handoff += 1;
                slot.backlog_drops += 1;
                if !slot.lagging
                    && self.options.lag_warn_frames > 0
                    && slot.backlog_drops >= self.options.lag_warn_frames
                {
                    slot.lagging = true;
                    log::warn!(
                        "analysis falling behind: {} frames dropped without catching up",
                        slot.backlog_drops
                    );
                }
            }
            displaced
        };
        self.wake.notify_one();
        if let Some(frame) = displaced {
            log::trace!("frame #{} dropped unanalyzed", frame.sequence);
        }
    }

    /// Block until a frame is pending or the analyzer closes.
    fn next_frame(&self) -> Option<Frame> {
        let mut slot = lock(&self.slot);
        loop {
            if slot.closed {
                return None;
            }
            if let Some(frame) = slot.take_pending() {
                return Some(frame);
            }
            slot = self
                .wake
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn analyze(&self, frame: Frame) {
        let captured = lock(&self.active).clone();
        let Some(pipeline) = captured else {
            drop(frame);
            self.counters.unselected.fetch_add(1, Ordering::Relaxed);
            if self.options.deliver_absent_results {
                self.deliver(None);
            }
            return;
        };

        let sequence = frame.sequence;
        let started = Instant::now();
        let outcome = pipeline.run(&frame);
        let elapsed = started.elapsed();
        let name = pipeline.name.clone();
        // Let go of the captured instance before delivery so a replaced
        // pipeline is already released when the consumer sees its last result.
        drop(pipeline);
        drop(frame);

        match outcome {
            Ok(inference) => {
                self.counters.analyzed.fetch_add(1, Ordering::Relaxed);
                if let Some(limit) = self.options.slow_analysis_warn {
                    if elapsed > limit {
                        self.counters.slow.fetch_add(1, Ordering::Relaxed);
                        log::warn!(
                            "slow analysis: {} took {}ms on frame #{}",
                            name,
                            elapsed.as_millis(),
                            sequence
                        );
                    }
                }
                let result =
                    AnalysisResult::new(inference, elapsed.as_millis() as u64, name, sequence);
                self.deliver(Some(result));
            }
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("frame #{} skipped: {}", sequence, err);
            }
        }
    }

    fn deliver(&self, result: Option<AnalysisResult>) {
        let mut sink = lock(&self.sink);
        if let Some(sink) = sink.as_mut() {
            match panic::catch_unwind(AssertUnwindSafe(|| sink.on_result(result))) {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(payload) => {
                    self.counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                    log::error!("result sink panicked: {}", panic_message(payload.as_ref()));
                }
            }
        }
    }

    fn run(self: Arc<Self>) {
        while let Some(frame) = self.next_frame() {
            self.analyze(frame);
        }
        log::debug!("analysis thread exiting");
    }
}

/// Cloneable producer handle. Camera threads hold this instead of the analyzer.
#[derive(Clone)]
pub struct FrameSink {
    shared: Arc<Shared>,
}

impl FrameSink {
    /// Offer a frame. Never blocks on inference and never fails; a frame that
    /// cannot be analyzed is simply dropped.
    pub fn on_frame(&self, frame: Frame) {
        self.shared.submit(frame);
    }
}

/// Drop-latest frame analyzer with a hot-swappable pipeline.
pub struct FrameAnalyzer {
    shared: Arc<Shared>,
    registry: Arc<PipelineRegistry>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl FrameAnalyzer {
    /// Start the analysis thread. No pipeline is selected initially.
    pub fn new<S: ResultSink>(
        registry: Arc<PipelineRegistry>,
        options: AnalyzerOptions,
        sink: S,
    ) -> anyhow::Result<Self> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(FrameSlot::default()),
            wake: Condvar::new(),
            active: Mutex::new(None),
            sink: Mutex::new(Some(Box::new(sink))),
            counters: Counters::default(),
            options,
        });

        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("frame-analyzer".to_string())
            .spawn(move || worker_shared.run())?;
        let worker_id = handle.thread().id();

        Ok(Self {
            shared,
            registry,
            worker: Mutex::new(Some(handle)),
            worker_id,
        })
    }

    pub fn registry(&self) -> &Arc<PipelineRegistry> {
        &self.registry
    }

    /// Handle for frame producers.
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink {
            shared: self.shared.clone(),
        }
    }

    pub fn on_frame(&self, frame: Frame) {
        self.shared.submit(frame);
    }

    /// Build entry `index`, warm it up and make it the active pipeline.
    ///
    /// On error the active pipeline is left unchanged. An analysis already
    /// running keeps the instance it started with.
    pub fn select_pipeline(&self, index: usize) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let name = self
            .registry
            .name(index)
            .ok_or(Error::InvalidPipelineIndex {
                index,
                len: self.registry.len(),
            })?
            .to_string();

        let mut instance = self.registry.instantiate(index)?;
        if let Err(source) = instance.warm_up() {
            instance.release();
            return Err(Error::PipelineInit { name, source });
        }

        let next = Arc::new(ActivePipeline {
            index,
            name: name.clone(),
            instance: Mutex::new(instance),
        });

        let previous = {
            let mut active = lock(&self.shared.active);
            // Checked under the active lock so a concurrent close() cannot
            // miss an instance installed after it cleared the slot.
            if lock(&self.shared.slot).closed {
                drop(active);
                drop(next);
                return Err(Error::Closed);
            }
            active.replace(next)
        };
        log::info!("selected pipeline #{} ({})", index, name);
        drop(previous);
        Ok(())
    }

    /// Deactivate the current pipeline, if any.
    pub fn clear_selection(&self) {
        let previous = lock(&self.shared.active).take();
        if let Some(previous) = previous {
            log::info!(
                "cleared pipeline selection #{} ({})",
                previous.index,
                previous.name
            );
        }
    }

    pub fn active_pipeline(&self) -> Option<ActiveSelection> {
        lock(&self.shared.active)
            .as_ref()
            .map(|active| ActiveSelection {
                index: active.index,
                name: active.name.clone(),
            })
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.slot).closed
    }

    pub fn stats(&self) -> AnalyzerStats {
        let (pending, lagging) = {
            let slot = lock(&self.shared.slot);
            (usize::from(slot.pending.is_some()), slot.lagging)
        };
        let c = &self.shared.counters;
        AnalyzerStats {
            frames_received: c.received.load(Ordering::Relaxed),
            frames_analyzed: c.analyzed.load(Ordering::Relaxed),
            frames_without_pipeline: c.unselected.load(Ordering::Relaxed),
            frames_dropped: c.dropped.load(Ordering::Relaxed),
            frames_rejected: c.rejected.load(Ordering::Relaxed),
            analysis_failures: c.failures.load(Ordering::Relaxed),
            slow_analyses: c.slow.load(Ordering::Relaxed),
            results_delivered: c.delivered.load(Ordering::Relaxed),
            sink_failures: c.sink_failures.load(Ordering::Relaxed),
            pending,
            lagging,
        }
    }

    /// Stop accepting frames, discard the pending frame, drain per
    /// `DrainPolicy`, and release the active pipeline.
    ///
    /// Idempotent. Once this returns no further result is delivered. When
    /// called from inside the result sink, the analysis thread stops after
    /// the current callback returns.
    pub fn close(&self) {
        let (first, abandoned) = {
            let mut slot = lock(&self.shared.slot);
            let first = !slot.closed;
            slot.closed = true;
            (first, slot.pending.take())
        };
        self.shared.wake.notify_all();
        if abandoned.is_some() {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        drop(abandoned);

        if thread::current().id() == self.worker_id {
            let active = lock(&self.shared.active).take();
            drop(active);
            return;
        }

        // Held until the drain completes so a concurrent second close() also
        // returns only after delivery has stopped.
        let mut worker = lock(&self.worker);
        if let Some(handle) = worker.take() {
            match self.shared.options.drain_policy {
                DrainPolicy::Wait => {
                    if handle.join().is_err() {
                        log::error!("analysis thread panicked");
                    }
                }
                DrainPolicy::Abandon => drop(handle),
            }
        }
        let sink = lock(&self.shared.sink).take();
        drop(sink);
        let active = lock(&self.shared.active).take();
        drop(active);

        if first {
            let stats = self.stats();
            log::info!(
                "analyzer closed: received={} analyzed={} dropped={} failed={}",
                stats.frames_received,
                stats.frames_analyzed,
                stats.frames_dropped,
                stats.analysis_failures
            );
        }
    }
}

impl Drop for FrameAnalyzer {
    fn drop(&mut self) {
        self.close();
    }
}
