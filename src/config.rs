use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analyzer::{AnalyzerOptions, DrainPolicy};
use crate::camera::synthetic::CameraConfig;
use crate::camera::LensFacing;
use crate::display::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::pipeline::PipelineRegistry;

const DEFAULT_CAMERA_URL: &str = "stub://back_camera";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 320;
const DEFAULT_CAMERA_HEIGHT: u32 = 240;
const DEFAULT_INITIAL_PIPELINE: &str = "0";
const DEFAULT_LAG_WARN_FRAMES: u64 = 30;
const DEFAULT_SLOW_ANALYSIS_WARN_MS: u64 = 500;
const DEFAULT_ONNX_INPUT_SIZE: u32 = 224;

#[derive(Debug, Deserialize, Default)]
struct AnalyzerConfigFile {
    camera: Option<CameraConfigFile>,
    analyzer: Option<AnalyzerSectionFile>,
    display: Option<DisplayConfigFile>,
    onnx: Option<OnnxConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    lens: Option<LensFacing>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalyzerSectionFile {
    initial_pipeline: Option<String>,
    drain_policy: Option<DrainPolicy>,
    deliver_absent_results: Option<bool>,
    lag_warn_frames: Option<u64>,
    slow_analysis_warn_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct OnnxConfigFile {
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub camera: CameraConfig,
    pub lens: LensFacing,
    /// Registry index or name selected at startup; `None` starts unselected.
    pub initial_pipeline: Option<String>,
    pub options: AnalyzerOptions,
    pub confidence_threshold: f32,
    pub onnx: Option<OnnxSettings>,
}

#[derive(Debug, Clone)]
pub struct OnnxSettings {
    pub model_path: PathBuf,
    pub labels_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self::from_file(AnalyzerConfigFile::default())
    }
}

impl AnalyzerConfig {
    /// Defaults, then the file named by `LIVE_ANALYZER_CONFIG` (JSON, or TOML
    /// for `.toml` paths), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LIVE_ANALYZER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnalyzerConfigFile) -> Self {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            url: camera_file
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };

        let analyzer = file.analyzer.unwrap_or_default();
        let initial_pipeline = match analyzer.initial_pipeline {
            Some(choice) if is_none_choice(&choice) => None,
            Some(choice) => Some(choice),
            None => Some(DEFAULT_INITIAL_PIPELINE.to_string()),
        };
        let options = AnalyzerOptions {
            drain_policy: analyzer.drain_policy.unwrap_or_default(),
            deliver_absent_results: analyzer.deliver_absent_results.unwrap_or(true),
            lag_warn_frames: analyzer.lag_warn_frames.unwrap_or(DEFAULT_LAG_WARN_FRAMES),
            slow_analysis_warn: match analyzer
                .slow_analysis_warn_ms
                .unwrap_or(DEFAULT_SLOW_ANALYSIS_WARN_MS)
            {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        };

        let onnx = file.onnx.and_then(onnx_settings);

        Self {
            camera,
            lens: camera_file.lens.unwrap_or_default(),
            initial_pipeline,
            options,
            confidence_threshold: file
                .display
                .and_then(|display| display.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            onnx,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("LIVE_ANALYZER_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(fps) = std::env::var("LIVE_ANALYZER_FPS") {
            self.camera.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("LIVE_ANALYZER_FPS must be an integer frame rate"))?;
        }
        if let Ok(choice) = std::env::var("LIVE_ANALYZER_PIPELINE") {
            let choice = choice.trim();
            if !choice.is_empty() {
                self.initial_pipeline = if is_none_choice(choice) {
                    None
                } else {
                    Some(choice.to_string())
                };
            }
        }
        if let Ok(threshold) = std::env::var("LIVE_ANALYZER_THRESHOLD") {
            self.confidence_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("LIVE_ANALYZER_THRESHOLD must be a number in [0, 1]"))?;
        }
        if let Ok(drain) = std::env::var("LIVE_ANALYZER_DRAIN") {
            if !drain.trim().is_empty() {
                self.options.drain_policy = drain.parse()?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be >= 1"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold {} is outside [0, 1]",
                self.confidence_threshold
            ));
        }
        Ok(())
    }

    /// Registry for this configuration: the built-in catalog, plus the ONNX
    /// classifier when a model is configured and the backend is compiled in.
    pub fn pipeline_registry(&self) -> Result<PipelineRegistry> {
        #[allow(unused_mut)]
        let mut registry = PipelineRegistry::builtin();
        if let Some(onnx) = &self.onnx {
            #[cfg(feature = "backend-tract")]
            {
                let onnx = onnx.clone();
                registry.register("onnx-classifier", move || {
                    let mut classifier = crate::pipeline::OnnxClassifier::new(
                        &onnx.model_path,
                        onnx.input_width,
                        onnx.input_height,
                    )?;
                    if let Some(labels) = &onnx.labels_path {
                        classifier = classifier.with_labels_file(labels)?;
                    }
                    Ok(Box::new(classifier))
                });
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                return Err(anyhow!(
                    "onnx model {} configured but the backend-tract feature is disabled",
                    onnx.model_path.display()
                ));
            }
        }
        Ok(registry)
    }
}

/// Resolve a pipeline choice (index or registry name) to an index.
pub fn resolve_pipeline(registry: &PipelineRegistry, choice: &str) -> Result<usize> {
    let choice = choice.trim();
    if let Ok(index) = choice.parse::<usize>() {
        if index < registry.len() {
            return Ok(index);
        }
        return Err(anyhow!(
            "pipeline index {} out of range (0..{})",
            index,
            registry.len()
        ));
    }
    registry.index_of(choice).ok_or_else(|| {
        anyhow!(
            "unknown pipeline '{}' (available: {})",
            choice,
            registry.names().join(", ")
        )
    })
}

fn is_none_choice(choice: &str) -> bool {
    choice.trim().eq_ignore_ascii_case("none")
}

fn onnx_settings(file: OnnxConfigFile) -> Option<OnnxSettings> {
    let model_path = file.model_path?;
    Some(OnnxSettings {
        model_path,
        labels_path: file.labels_path,
        input_width: file.input_width.unwrap_or(DEFAULT_ONNX_INPUT_SIZE),
        input_height: file.input_height.unwrap_or(DEFAULT_ONNX_INPUT_SIZE),
    })
}

fn read_config_file(path: &Path) -> Result<AnalyzerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
