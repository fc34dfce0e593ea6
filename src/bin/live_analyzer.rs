//! live_analyzer - run a pipeline over a live camera stream
//!
//! This binary:
//! 1. Loads configuration (file named by LIVE_ANALYZER_CONFIG, then env overrides)
//! 2. Starts the frame analyzer and selects the initial pipeline
//! 3. Binds the camera (`stub://` sources are synthetic) for the host lifecycle
//! 4. Renders the freshest result as a text overlay until stopped

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use live_analyzer::{
    resolve_pipeline, result_mailbox, AnalyzerConfig, CameraSession, CountingPreview,
    DisplayModel, FrameAnalyzer, HostLifecycle, Received, SyntheticCamera,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(10);
const RESULT_POLL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stop after this many seconds (runs until Ctrl-C when omitted).
    #[arg(long)]
    seconds: Option<u64>,
    /// Pipeline to select at startup: registry index, name, or "none".
    #[arg(long)]
    pipeline: Option<String>,
    /// Print the pipeline registry and exit.
    #[arg(long)]
    list_pipelines: bool,
    /// Camera frame rate override.
    #[arg(long)]
    fps: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = AnalyzerConfig::load()?;
    if let Some(fps) = args.fps {
        if fps == 0 {
            return Err(anyhow!("fps must be >= 1"));
        }
        cfg.camera.target_fps = fps;
    }
    if let Some(choice) = args.pipeline.as_deref() {
        cfg.initial_pipeline = if choice.trim().eq_ignore_ascii_case("none") {
            None
        } else {
            Some(choice.to_string())
        };
    }

    let registry = Arc::new(cfg.pipeline_registry()?);
    if args.list_pipelines {
        for (index, name) in registry.names().iter().enumerate() {
            println!("{:>2}  {}", index, name);
        }
        return Ok(());
    }
    let initial = cfg
        .initial_pipeline
        .as_deref()
        .map(|choice| resolve_pipeline(&registry, choice))
        .transpose()?;

    let (mailbox, results) = result_mailbox();
    let analyzer = Arc::new(FrameAnalyzer::new(
        registry.clone(),
        cfg.options.clone(),
        mailbox,
    )?);
    if let Some(index) = initial {
        analyzer.select_pipeline(index)?;
    } else {
        log::info!("starting with no pipeline selected");
    }

    let preview = Arc::new(CountingPreview::new());
    let camera = SyntheticCamera::new(cfg.camera.clone())?;
    let mut session =
        CameraSession::new(analyzer.clone(), Box::new(camera), preview.clone()).with_lens(cfg.lens);

    let host = HostLifecycle::new("live_analyzer");
    host.start();
    if !session.bind(&host) {
        eprintln!("error: camera {} could not be bound", cfg.camera.url);
        std::process::exit(1);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = stop.clone();
    ctrlc::set_handler(move || {
        stop_signal.store(true, Ordering::SeqCst);
    })?;

    log::info!(
        "live_analyzer running. camera={} fps={} threshold={}",
        cfg.camera.url,
        cfg.camera.target_fps,
        cfg.confidence_threshold
    );

    let deadline = args
        .seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut display = DisplayModel::new(cfg.confidence_threshold);
    let mut last_health_log = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        match results.recv_timeout(RESULT_POLL) {
            Received::Result(result) => {
                let pipeline = result
                    .as_ref()
                    .map(|result| result.pipeline().to_string());
                match display.apply(result.as_ref()) {
                    Some(overlay) => println!("{}", overlay),
                    None => log::debug!(
                        "no visible detection ({})",
                        pipeline.as_deref().unwrap_or("no pipeline")
                    ),
                }
            }
            Received::Timeout => {}
            Received::Closed => {
                log::warn!("analyzer stopped delivering results");
                break;
            }
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = analyzer.stats();
            log::info!(
                "health: preview={} received={} analyzed={} dropped={} failed={} lagging={}",
                preview.frames(),
                stats.frames_received,
                stats.frames_analyzed,
                stats.frames_dropped,
                stats.analysis_failures,
                stats.lagging
            );
            last_health_log = Instant::now();
        }
    }

    log::info!("shutting down");
    host.stop();
    session.release();

    let stats = analyzer.stats();
    println!(
        "frames: received={} analyzed={} dropped={} rejected={} failed={} delivered={}",
        stats.frames_received,
        stats.frames_analyzed,
        stats.frames_dropped,
        stats.frames_rejected,
        stats.analysis_failures,
        stats.results_delivered
    );
    Ok(())
}
