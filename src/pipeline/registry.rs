use anyhow::Result;

use crate::error::Error;

use super::backend::InferencePipeline;
use super::backends::{BrightRegionDetector, ColorClassifier, MotionPipeline};

/// Builds a fresh pipeline instance.
pub type PipelineFactory = Box<dyn Fn() -> Result<Box<dyn InferencePipeline>> + Send + Sync>;

struct Entry {
    name: String,
    factory: PipelineFactory,
}

/// Ordered, fixed catalog of inference pipelines.
///
/// Built once at startup and shared behind an `Arc`; entries are addressed by
/// their stable index. Every `instantiate` call builds a new instance, so no
/// inference state is shared across selections.
pub struct PipelineRegistry {
    entries: Vec<Entry>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Default catalog of CPU pipelines.
    pub fn builtin() -> Self {
        Self::new()
            .with("motion", || Ok(Box::new(MotionPipeline::new())))
            .with("color-classifier", || Ok(Box::new(ColorClassifier::new())))
            .with("bright-region-detector", || {
                Ok(Box::new(BrightRegionDetector::new()))
            })
    }

    /// Append an entry. Its index is the number of entries registered before it.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn InferencePipeline>> + Send + Sync + 'static,
    {
        self.entries.push(Entry {
            name: name.into(),
            factory: Box::new(factory),
        });
    }

    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn InferencePipeline>> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Display names in index order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Construct a fresh instance of entry `index`.
    pub fn instantiate(&self, index: usize) -> Result<Box<dyn InferencePipeline>, Error> {
        let entry = self.entries.get(index).ok_or(Error::InvalidPipelineIndex {
            index,
            len: self.entries.len(),
        })?;
        (entry.factory)().map_err(|source| Error::PipelineInit {
            name: entry.name.clone(),
            source,
        })
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
