//! Synthetic camera for `stub://` sources.
//!
//! Produces RGB frames on its own producer thread at the configured rate, the
//! way a real capture backend would: frames arrive whether or not the analyzer
//! keeps up. The scene is a colored background that changes every 50 frames
//! with a bright square sweeping across it, so every built-in pipeline has
//! something to report.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use rand::Rng;

use super::{BindRequest, CameraProvider, LensFacing};
use crate::frame::{Frame, PixelFormat};

const SQUARE_SIZE: u32 = 16;
const FRAMES_PER_SCENE: u64 = 50;

/// Configuration for a synthetic camera.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Source URL. Only `stub://` URLs are accepted.
    pub url: String,
    /// Frames per second produced by the camera thread.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "stub://back_camera".to_string(),
            target_fps: 30,
            width: 320,
            height: 240,
        }
    }
}

/// Statistics for a synthetic camera.
#[derive(Clone, Debug)]
pub struct SyntheticStats {
    pub frames_captured: u64,
    pub url: String,
}

pub struct SyntheticCamera {
    config: CameraConfig,
    frames_captured: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.target_fps == 0 {
            return Err(anyhow!("target_fps must be >= 1"));
        }
        if config.width < SQUARE_SIZE || config.height < SQUARE_SIZE {
            return Err(anyhow!(
                "synthetic frames must be at least {}x{}",
                SQUARE_SIZE,
                SQUARE_SIZE
            ));
        }
        rgb_frame_len(config.width, config.height)?;
        Ok(Self {
            config,
            frames_captured: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            producer: None,
        })
    }

    pub fn stats(&self) -> SyntheticStats {
        SyntheticStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            url: self.config.url.clone(),
        }
    }

    /// Check if the producer thread is running.
    pub fn is_healthy(&self) -> bool {
        self.producer
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl CameraProvider for SyntheticCamera {
    fn bind(&mut self, request: BindRequest) -> Result<()> {
        if self.producer.is_some() {
            return Err(anyhow!("camera {} is already bound", self.config.url));
        }
        if !self.config.url.starts_with("stub://") {
            return Err(anyhow!(
                "no capture backend for '{}' (only stub:// sources are built in)",
                self.config.url
            ));
        }
        if request.lens != LensFacing::Back {
            return Err(anyhow!("{} has no {:?} lens", self.config.url, request.lens));
        }

        self.running.store(true, Ordering::SeqCst);
        let mut scene = SyntheticScene::new(self.config.width, self.config.height);
        let interval = Duration::from_secs_f64(1.0 / self.config.target_fps as f64);
        let running = self.running.clone();
        let captured = self.frames_captured.clone();
        let BindRequest {
            preview, frames, ..
        } = request;

        let handle = thread::Builder::new()
            .name("synthetic-camera".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let tick = Instant::now();
                    match scene.next_frame() {
                        Ok(frame) => {
                            preview.on_preview(&frame.inference_view());
                            captured.fetch_add(1, Ordering::Relaxed);
                            frames.on_frame(frame);
                        }
                        Err(err) => {
                            log::error!("synthetic camera stopped: {}", err);
                            break;
                        }
                    }
                    if let Some(rest) = interval.checked_sub(tick.elapsed()) {
                        thread::sleep(rest);
                    }
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                anyhow!("failed to start camera thread: {}", e)
            })?;

        self.producer = Some(handle);
        log::info!(
            "SyntheticCamera: streaming {} at {} fps ({}x{})",
            self.config.url,
            self.config.target_fps,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn unbind_all(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                log::error!("synthetic camera thread panicked");
            }
        }
    }

    fn is_bound(&self) -> bool {
        self.producer.is_some()
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.unbind_all();
    }
}

/// Byte length of an RGB frame, computed in `usize`.
fn rgb_frame_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(PixelFormat::Rgb8.bytes_per_pixel()))
        .ok_or_else(|| anyhow!("synthetic frame size {}x{} overflows", width, height))
}

struct SyntheticScene {
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
    square_x: u32,
    square_y: u32,
}

impl SyntheticScene {
    fn new(width: u32, height: u32) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            width,
            height,
            frame_count: 0,
            scene_state: 0,
            square_x: rng.gen_range(0..=width - SQUARE_SIZE),
            square_y: rng.gen_range(0..=height - SQUARE_SIZE),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        if self.frame_count % FRAMES_PER_SCENE == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        self.square_x = (self.square_x + 2) % (self.width - SQUARE_SIZE + 1);

        let background: [u8; 3] = match self.scene_state % 4 {
            0 => [150, 30, 30],
            1 => [30, 150, 30],
            2 => [30, 30, 150],
            _ => [90, 90, 90],
        };

        let mut pixels = Vec::with_capacity(rgb_frame_len(self.width, self.height)?);
        for y in 0..self.height {
            for x in 0..self.width {
                let in_square = (self.square_x..self.square_x + SQUARE_SIZE).contains(&x)
                    && (self.square_y..self.square_y + SQUARE_SIZE).contains(&y);
                if in_square {
                    pixels.extend_from_slice(&[250, 250, 250]);
                } else {
                    pixels.extend_from_slice(&background);
                }
            }
        }

        Frame::new(
            pixels,
            self.width,
            self.height,
            PixelFormat::Rgb8,
            self.frame_count,
        )
    }
}
