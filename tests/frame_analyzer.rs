use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use crossbeam_channel::{unbounded, Receiver, Sender};

use live_analyzer::{
    AnalysisResult, AnalyzerOptions, DrainPolicy, Error, Frame, FrameAnalyzer, Inference,
    InferencePipeline, InferenceView, PipelineRegistry, PixelFormat, Prediction,
};

const WAIT: Duration = Duration::from_secs(5);

type Events = Arc<Mutex<Vec<String>>>;

fn frame(seq: u64) -> Frame {
    Frame::new(vec![seq as u8; 4], 2, 2, PixelFormat::Gray8, seq).expect("frame")
}

fn events_of(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}

fn position(events: &[String], entry: &str) -> usize {
    events
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("missing event {entry} in {events:?}"))
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Pipeline that reports each analysis start and, when gated, blocks until
/// the test hands it a permit.
struct Gated {
    name: &'static str,
    started: Sender<u64>,
    gate: Option<Receiver<()>>,
    events: Events,
}

impl InferencePipeline for Gated {
    fn name(&self) -> &'static str {
        self.name
    }

    fn analyze(&mut self, view: &InferenceView<'_>) -> anyhow::Result<Inference> {
        let seq = view.sequence();
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:start:{}", self.name, seq));
        let _ = self.started.send(seq);
        if let Some(gate) = &self.gate {
            gate.recv_timeout(WAIT)
                .map_err(|_| anyhow!("gate never opened"))?;
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:end:{}", self.name, seq));
        Ok(Inference::new(Prediction::Label(self.name.to_string()), 0.9))
    }

    fn release(&mut self) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:release", self.name));
    }
}

struct Harness {
    analyzer: FrameAnalyzer,
    results: Receiver<Option<AnalysisResult>>,
    started: Receiver<u64>,
    gate: Sender<()>,
    events: Events,
}

impl Harness {
    /// Registry `[A (gated), B (free-running)]`.
    fn new(options: AnalyzerOptions) -> Self {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started) = unbounded();
        let (gate, gate_rx) = unbounded();

        let mut registry = PipelineRegistry::new();
        {
            let started = started_tx.clone();
            let events = events.clone();
            registry.register("A", move || {
                Ok(Box::new(Gated {
                    name: "A",
                    started: started.clone(),
                    gate: Some(gate_rx.clone()),
                    events: events.clone(),
                }))
            });
        }
        {
            let events = events.clone();
            registry.register("B", move || {
                Ok(Box::new(Gated {
                    name: "B",
                    started: started_tx.clone(),
                    gate: None,
                    events: events.clone(),
                }))
            });
        }

        let (results_tx, results) = unbounded();
        let sink_events = events.clone();
        let analyzer = FrameAnalyzer::new(
            Arc::new(registry),
            options,
            move |result: Option<AnalysisResult>| {
                let entry = match &result {
                    Some(r) => format!("result:{}:{}", r.pipeline(), r.frame_sequence()),
                    None => "result:none".to_string(),
                };
                sink_events.lock().unwrap().push(entry);
                let _ = results_tx.send(result);
            },
        )
        .expect("analyzer");

        Self {
            analyzer,
            results,
            started,
            gate,
            events,
        }
    }

    fn next_started(&self) -> u64 {
        self.started.recv_timeout(WAIT).expect("analysis started")
    }

    fn open_gate(&self) {
        self.gate.send(()).expect("gate");
    }

    fn next_result(&self) -> Option<AnalysisResult> {
        self.results.recv_timeout(WAIT).expect("result delivered")
    }

    fn releases_of(&self, name: &str) -> usize {
        let entry = format!("{name}:release");
        events_of(&self.events)
            .iter()
            .filter(|e| **e == entry)
            .count()
    }
}

fn discard(_: Option<AnalysisResult>) {}

fn label(result: &AnalysisResult) -> Option<&str> {
    result.prediction().label()
}

#[test]
fn scenario_select_drop_swap_release() {
    let h = Harness::new(AnalyzerOptions {
        deliver_absent_results: false,
        ..AnalyzerOptions::default()
    });

    // Nothing selected: the frame is consumed without a result.
    h.analyzer.on_frame(frame(0));
    assert!(wait_until(|| h.analyzer.stats().frames_without_pipeline == 1));

    h.analyzer.select_pipeline(0).unwrap();
    h.analyzer.on_frame(frame(1));
    assert_eq!(h.next_started(), 1);
    h.open_gate();
    let r1 = h.next_result().expect("result for f1");
    assert_eq!(r1.frame_sequence(), 1);
    assert_eq!(label(&r1), Some("A"));

    // f2 is in flight; f3 then f4 arrive while it runs.
    h.analyzer.on_frame(frame(2));
    assert_eq!(h.next_started(), 2);
    h.analyzer.on_frame(frame(3));
    h.analyzer.on_frame(frame(4));
    let stats = h.analyzer.stats();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.frames_dropped, 1);

    h.open_gate();
    assert_eq!(h.next_result().unwrap().frame_sequence(), 2);
    assert_eq!(h.next_started(), 4);
    h.open_gate();
    assert_eq!(h.next_result().unwrap().frame_sequence(), 4);

    h.analyzer.select_pipeline(1).unwrap();
    h.analyzer.on_frame(frame(5));
    let r5 = h.next_result().expect("result for f5");
    assert_eq!(r5.frame_sequence(), 5);
    assert_eq!(label(&r5), Some("B"));
    assert_eq!(r5.pipeline(), "B");

    h.analyzer.close();

    let events = events_of(&h.events);
    assert!(!events.iter().any(|e| e == "A:start:3"));
    assert!(!events.iter().any(|e| e == "result:none"));
    assert!(position(&events, "A:end:4") < position(&events, "A:release"));
    assert_eq!(h.releases_of("A"), 1);
    assert_eq!(h.releases_of("B"), 1);

    let stats = h.analyzer.stats();
    assert_eq!(stats.frames_received, 6);
    assert_eq!(stats.frames_without_pipeline, 1);
    assert_eq!(stats.frames_analyzed, 4);
    assert_eq!(stats.results_delivered, 4);
}

#[test]
fn swap_during_analysis_releases_after_in_flight_completes() {
    let h = Harness::new(AnalyzerOptions::default());
    h.analyzer.select_pipeline(0).unwrap();
    h.analyzer.on_frame(frame(1));
    assert_eq!(h.next_started(), 1);

    // Swap while A is still analyzing f1.
    h.analyzer.select_pipeline(1).unwrap();
    assert_eq!(h.analyzer.active_pipeline().unwrap().name, "B");
    assert_eq!(h.releases_of("A"), 0);

    h.open_gate();
    let r1 = h.next_result().unwrap();
    assert_eq!(label(&r1), Some("A"));

    let events = events_of(&h.events);
    assert!(position(&events, "A:end:1") < position(&events, "A:release"));
    // Released before its last result reaches the consumer.
    assert!(position(&events, "A:release") < position(&events, "result:A:1"));

    h.analyzer.on_frame(frame(2));
    assert_eq!(label(&h.next_result().unwrap()), Some("B"));
    h.analyzer.close();
    assert_eq!(h.releases_of("A"), 1);
}

#[test]
fn invalid_index_leaves_selection_unchanged() {
    let h = Harness::new(AnalyzerOptions::default());
    h.analyzer.select_pipeline(1).unwrap();

    let err = h.analyzer.select_pipeline(2).unwrap_err();
    assert!(matches!(err, Error::InvalidPipelineIndex { index: 2, len: 2 }));
    assert_eq!(h.analyzer.active_pipeline().unwrap().index, 1);

    h.analyzer.on_frame(frame(1));
    assert_eq!(label(&h.next_result().unwrap()), Some("B"));
}

struct FailsWarmUp {
    released: Arc<AtomicUsize>,
}

impl InferencePipeline for FailsWarmUp {
    fn name(&self) -> &'static str {
        "fails-warm-up"
    }

    fn analyze(&mut self, _view: &InferenceView<'_>) -> anyhow::Result<Inference> {
        Ok(Inference::none())
    }

    fn warm_up(&mut self) -> anyhow::Result<()> {
        Err(anyhow!("model file missing"))
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn failed_construction_keeps_previous_pipeline() {
    let released = Arc::new(AtomicUsize::new(0));
    let factory_released = released.clone();
    let registry = PipelineRegistry::builtin()
        .with("broken-factory", || Err(anyhow!("no such model")))
        .with("broken-warm-up", move || {
            Ok(Box::new(FailsWarmUp {
                released: factory_released.clone(),
            }))
        });
    let analyzer = FrameAnalyzer::new(Arc::new(registry), AnalyzerOptions::default(), discard)
        .unwrap();
    analyzer.select_pipeline(0).unwrap();

    let err = analyzer.select_pipeline(3).unwrap_err();
    assert!(matches!(err, Error::PipelineInit { ref name, .. } if name == "broken-factory"));
    let err = analyzer.select_pipeline(4).unwrap_err();
    assert!(matches!(err, Error::PipelineInit { ref name, .. } if name == "broken-warm-up"));

    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(analyzer.active_pipeline().unwrap().name, "motion");
}

#[test]
fn absent_results_follow_delivery_option() {
    let h = Harness::new(AnalyzerOptions::default());
    h.analyzer.on_frame(frame(1));
    assert!(h.next_result().is_none());

    let quiet = Harness::new(AnalyzerOptions {
        deliver_absent_results: false,
        ..AnalyzerOptions::default()
    });
    quiet.analyzer.on_frame(frame(1));
    // Analysis is sequential, so had f1 produced a callback it would arrive
    // before the result for f2.
    assert!(wait_until(|| quiet.analyzer.stats().frames_without_pipeline == 1));
    quiet.analyzer.select_pipeline(1).unwrap();
    quiet.analyzer.on_frame(frame(2));
    let first = quiet.next_result().expect("result for f2");
    assert_eq!(first.frame_sequence(), 2);
}

struct Flaky;

impl InferencePipeline for Flaky {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn analyze(&mut self, view: &InferenceView<'_>) -> anyhow::Result<Inference> {
        match view.sequence() {
            1 => Err(anyhow!("tensor shape mismatch")),
            2 => panic!("backend crashed"),
            _ => Ok(Inference::new(Prediction::Label("ok".into()), 0.7)),
        }
    }
}

#[test]
fn failures_and_panics_skip_frame_and_keep_running() {
    let (tx, rx) = unbounded();
    let registry = PipelineRegistry::new().with("flaky", || Ok(Box::new(Flaky)));
    let analyzer = FrameAnalyzer::new(
        Arc::new(registry),
        AnalyzerOptions::default(),
        move |result: Option<AnalysisResult>| {
            let _ = tx.send(result);
        },
    )
    .unwrap();
    analyzer.select_pipeline(0).unwrap();

    analyzer.on_frame(frame(1));
    assert!(wait_until(|| analyzer.stats().analysis_failures == 1));
    analyzer.on_frame(frame(2));
    assert!(wait_until(|| analyzer.stats().analysis_failures == 2));
    analyzer.on_frame(frame(3));

    let result = rx.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(result.frame_sequence(), 3);
    assert_eq!(result.prediction().label(), Some("ok"));
    assert!(rx.try_recv().is_err());

    let stats = analyzer.stats();
    assert_eq!(stats.frames_analyzed, 1);
    assert_eq!(stats.results_delivered, 1);
    assert_eq!(analyzer.active_pipeline().unwrap().name, "flaky");
}

struct Sleepy(Duration);

impl InferencePipeline for Sleepy {
    fn name(&self) -> &'static str {
        "sleepy"
    }

    fn analyze(&mut self, _view: &InferenceView<'_>) -> anyhow::Result<Inference> {
        thread::sleep(self.0);
        Ok(Inference::none())
    }
}

#[test]
fn analyzed_count_bounded_under_overload() {
    let min_analysis = Duration::from_millis(20);
    let registry =
        PipelineRegistry::new().with("sleepy", move || Ok(Box::new(Sleepy(min_analysis))));
    let analyzer = FrameAnalyzer::new(Arc::new(registry), AnalyzerOptions::default(), discard)
        .unwrap();
    analyzer.select_pipeline(0).unwrap();

    let start = Instant::now();
    let mut seq = 0;
    while start.elapsed() < Duration::from_millis(300) {
        seq += 1;
        analyzer.on_frame(frame(seq));
        assert!(analyzer.stats().pending <= 1);
        thread::sleep(Duration::from_millis(1));
    }
    analyzer.close();
    let elapsed = start.elapsed();

    let stats = analyzer.stats();
    let bound = (elapsed.as_millis() as u64).div_ceil(min_analysis.as_millis() as u64) + 1;
    assert!(stats.frames_analyzed <= bound, "{stats:?} exceeds {bound}");
    assert!(stats.frames_analyzed >= 1);
    assert!(stats.frames_dropped > 0);
    assert_eq!(stats.frames_received, seq);
    assert_eq!(
        stats.frames_received,
        stats.frames_analyzed + stats.frames_dropped
    );
}

#[test]
fn close_is_idempotent_and_silences_callbacks() {
    let h = Harness::new(AnalyzerOptions::default());
    h.analyzer.select_pipeline(1).unwrap();
    h.analyzer.on_frame(frame(1));
    assert!(h.next_result().is_some());

    h.analyzer.close();
    h.analyzer.close();
    h.analyzer.on_frame(frame(2));

    assert!(h.results.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(h.analyzer.active_pipeline().is_none());
    assert_eq!(h.releases_of("B"), 1);
    assert_eq!(h.analyzer.stats().frames_rejected, 1);
}

#[test]
fn wait_drain_delivers_in_flight_result_before_returning() {
    let h = Arc::new(Harness::new(AnalyzerOptions::default()));
    h.analyzer.select_pipeline(0).unwrap();
    h.analyzer.on_frame(frame(1));
    assert_eq!(h.next_started(), 1);

    let closed = Arc::new(AtomicBool::new(false));
    let closer = {
        let h = h.clone();
        let closed = closed.clone();
        thread::spawn(move || {
            h.analyzer.close();
            closed.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!closed.load(Ordering::SeqCst));

    h.open_gate();
    closer.join().unwrap();
    assert_eq!(h.results.try_recv().unwrap().unwrap().frame_sequence(), 1);
    assert_eq!(h.releases_of("A"), 1);
}

#[test]
fn abandon_drain_returns_without_waiting() {
    let h = Harness::new(AnalyzerOptions {
        drain_policy: DrainPolicy::Abandon,
        ..AnalyzerOptions::default()
    });
    h.analyzer.select_pipeline(0).unwrap();
    h.analyzer.on_frame(frame(1));
    assert_eq!(h.next_started(), 1);

    h.analyzer.close();
    assert!(h.analyzer.is_closed());
    assert_eq!(h.releases_of("A"), 0);

    // The abandoned analysis finishes in the background; its result is dropped.
    h.open_gate();
    assert!(wait_until(|| h.releases_of("A") == 1));
    assert!(h.results.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(!events_of(&h.events).iter().any(|e| e.starts_with("result:")));
}

#[test]
fn lagging_persists_across_analyses_until_a_drop_free_handoff() {
    let h = Harness::new(AnalyzerOptions {
        lag_warn_frames: 3,
        ..AnalyzerOptions::default()
    });
    h.analyzer.select_pipeline(0).unwrap();
    h.analyzer.on_frame(frame(1));
    assert_eq!(h.next_started(), 1);

    // Two drops while f1 runs, then two more while f4 runs.
    for seq in 2..=4 {
        h.analyzer.on_frame(frame(seq));
    }
    assert!(!h.analyzer.stats().lagging);
    h.open_gate();
    assert_eq!(h.next_started(), 4);
    for seq in 5..=7 {
        h.analyzer.on_frame(frame(seq));
    }
    assert!(h.analyzer.stats().lagging);

    h.open_gate();
    assert_eq!(h.next_started(), 7);
    // Taking f7 followed drops, so the analyzer has not caught up yet.
    assert!(h.analyzer.stats().lagging);
    h.open_gate();
    // Results for f1, f4 and f7.
    assert!(wait_until(|| h.results.len() == 3));

    h.analyzer.on_frame(frame(8));
    assert_eq!(h.next_started(), 8);
    assert!(!h.analyzer.stats().lagging);
    h.open_gate();
}

#[test]
fn sustained_overload_reports_lagging() {
    let registry = PipelineRegistry::new()
        .with("sleepy", || Ok(Box::new(Sleepy(Duration::from_millis(40)))));
    let analyzer = FrameAnalyzer::new(
        Arc::new(registry),
        AnalyzerOptions {
            lag_warn_frames: 10,
            ..AnalyzerOptions::default()
        },
        discard,
    )
    .unwrap();
    analyzer.select_pipeline(0).unwrap();

    let start = Instant::now();
    let mut seq = 0;
    let mut ever_lagging = false;
    while start.elapsed() < Duration::from_millis(600) {
        seq += 1;
        analyzer.on_frame(frame(seq));
        ever_lagging |= analyzer.stats().lagging;
        thread::sleep(Duration::from_millis(5));
    }

    let stats = analyzer.stats();
    assert!(stats.frames_dropped > stats.frames_analyzed, "{stats:?}");
    assert!(ever_lagging, "{stats:?}");
}

#[test]
fn slow_analyses_are_counted() {
    let registry = PipelineRegistry::new()
        .with("sleepy", || Ok(Box::new(Sleepy(Duration::from_millis(30)))));
    let analyzer = FrameAnalyzer::new(
        Arc::new(registry),
        AnalyzerOptions {
            slow_analysis_warn: Some(Duration::from_millis(5)),
            ..AnalyzerOptions::default()
        },
        discard,
    )
    .unwrap();
    analyzer.select_pipeline(0).unwrap();

    analyzer.on_frame(frame(1));
    assert!(wait_until(|| analyzer.stats().frames_analyzed == 1));
    assert_eq!(analyzer.stats().slow_analyses, 1);
}

#[test]
fn panicking_sink_does_not_stop_analysis() {
    let (tx, rx) = unbounded();
    let mut calls = 0;
    let registry = PipelineRegistry::new()
        .with("sleepy", || Ok(Box::new(Sleepy(Duration::from_millis(1)))));
    let analyzer = FrameAnalyzer::new(
        Arc::new(registry),
        AnalyzerOptions::default(),
        move |result: Option<AnalysisResult>| {
            calls += 1;
            if calls == 1 {
                panic!("consumer bug");
            }
            let _ = tx.send(result);
        },
    )
    .unwrap();
    analyzer.select_pipeline(0).unwrap();

    analyzer.on_frame(frame(1));
    assert!(wait_until(|| analyzer.stats().sink_failures == 1));

    for seq in 2..=4 {
        analyzer.on_frame(frame(seq));
        let result = rx.recv_timeout(WAIT).expect("analysis continues");
        assert_eq!(result.unwrap().frame_sequence(), seq);
    }

    let stats = analyzer.stats();
    assert!(!analyzer.is_closed());
    assert_eq!(stats.frames_analyzed, 4);
    assert_eq!(stats.results_delivered, 3);
    assert_eq!(stats.sink_failures, 1);
}

struct PanicsOnRelease(Arc<AtomicUsize>);

impl InferencePipeline for PanicsOnRelease {
    fn name(&self) -> &'static str {
        "panics-on-release"
    }

    fn analyze(&mut self, _view: &InferenceView<'_>) -> anyhow::Result<Inference> {
        Ok(Inference::none())
    }

    fn release(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
        panic!("double free in backend");
    }
}

#[test]
fn panicking_release_is_contained() {
    let released = Arc::new(AtomicUsize::new(0));
    let factory_released = released.clone();
    let registry = PipelineRegistry::new()
        .with("panics-on-release", move || {
            Ok(Box::new(PanicsOnRelease(factory_released.clone())))
        })
        .with("sleepy", || Ok(Box::new(Sleepy(Duration::from_millis(1)))));
    let (tx, rx) = unbounded();
    let analyzer = FrameAnalyzer::new(
        Arc::new(registry),
        AnalyzerOptions::default(),
        move |result: Option<AnalysisResult>| {
            let _ = tx.send(result);
        },
    )
    .unwrap();

    analyzer.select_pipeline(0).unwrap();
    analyzer.on_frame(frame(1));
    assert!(rx.recv_timeout(WAIT).unwrap().is_some());

    analyzer.select_pipeline(1).unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
    analyzer.on_frame(frame(2));
    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap().pipeline(), "sleepy");
}
