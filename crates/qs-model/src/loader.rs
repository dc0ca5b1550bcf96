use std::collections::HashMap;
use std::path::{Path, PathBuf};

use qs_tensor::Tensor;

use crate::engine::Engine;
use crate::error::{ModelError, Result};
use crate::shard::{self, ShardFile};

/// Summary of a completed load pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Number of shard files processed.
    pub shards: usize,
    /// Number of tensors registered.
    pub tensors: usize,
    /// Total f32 elements handed to the engine.
    pub elements: usize,
}

/// Registers every tensor of a checkpoint directory into an engine.
///
/// Shards are visited in file-name order, tensors in each shard's storage
/// order. Each tensor is upcast to f32 and made contiguous before its buffer
/// reaches the engine.
///
/// A load pass either succeeds completely or fails. There is no rollback:
/// tensors registered before the failing one stay in the engine, since
/// engines cannot unregister.
#[derive(Debug, Default)]
pub struct WeightLoader {
    /// Name -> shard that supplied it, for duplicate detection.
    registered: HashMap<String, PathBuf>,
    report: LoadReport,
}

impl WeightLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all shards in `dir` into `engine`.
    pub fn load_dir<E: Engine + ?Sized>(mut self, dir: &Path, engine: &mut E) -> Result<LoadReport> {
        let shards = shard::list_shards(dir)?;
        tracing::info!(dir = %dir.display(), shards = shards.len(), "loading weights");

        for path in &shards {
            self.load_shard(path, engine)?;
        }

        tracing::info!(
            tensors = self.report.tensors,
            elements = self.report.elements,
            "weights loaded"
        );
        Ok(self.report)
    }

    /// Load every tensor of one shard.
    ///
    /// Tensors are decoded one at a time and each is dropped once the engine
    /// has its copy, so at most one decoded tensor is alive at any point.
    pub fn load_shard<E: Engine + ?Sized>(&mut self, path: &Path, engine: &mut E) -> Result<()> {
        let shard = ShardFile::open(path)?;
        tracing::info!(shard = %path.display(), tensors = shard.entries().len(), "reading shard");

        for entry in shard.entries() {
            let tensor = shard.read(entry)?;
            self.register(path, &entry.name, &tensor, engine)?;
        }
        self.report.shards += 1;
        Ok(())
    }

    /// Normalize one tensor and register it under `name`.
    ///
    /// `source` identifies where the tensor came from, for duplicate reports.
    pub fn register<E: Engine + ?Sized>(
        &mut self,
        source: &Path,
        name: &str,
        tensor: &Tensor,
        engine: &mut E,
    ) -> Result<()> {
        if let Some(first) = self.registered.get(name) {
            return Err(ModelError::DuplicateWeightName {
                name: name.to_string(),
                first: first.clone(),
                second: source.to_path_buf(),
            });
        }

        let normalized = tensor.to_f32().contiguous();
        let data = normalized.as_f32_slice()?;

        engine
            .register_weight(name, data)
            .map_err(|source| ModelError::EngineRejectedWeight {
                name: name.to_string(),
                source,
            })?;

        tracing::debug!(name, dtype = %tensor.dtype(), dims = ?tensor.dims(), "registered weight");
        self.registered.insert(name.to_string(), source.to_path_buf());
        self.report.tensors += 1;
        self.report.elements += data.len();
        Ok(())
    }
}

/// Load every shard in `dir` into `engine` with a fresh [`WeightLoader`].
pub fn load_weights<E: Engine + ?Sized>(dir: &Path, engine: &mut E) -> Result<LoadReport> {
    WeightLoader::new().load_dir(dir, engine)
}
