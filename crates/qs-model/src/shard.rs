use std::path::{Path, PathBuf};

use memmap2::Mmap;
use safetensors::{Dtype, SafeTensors};

use qs_tensor::{CpuStorage, DType, Tensor};

use crate::error::{ModelError, Result};

/// File extension of weight shards.
pub const SHARD_EXTENSION: &str = "safetensors";

/// List the weight shards in `dir`, sorted by file name.
///
/// Sorting makes registration order independent of directory enumeration
/// order. A directory without shards yields an empty list.
pub fn list_shards(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| ModelError::weight_file(dir, e))?;

    let mut shards = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ModelError::weight_file(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == SHARD_EXTENSION) {
            shards.push(path);
        }
    }
    shards.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(shards)
}

/// One tensor entry of a shard header. Nothing is decoded until
/// [`ShardFile::read`] is called with it.
#[derive(Debug, Clone)]
pub struct ShardEntry {
    pub name: String,
    dtype: Dtype,
    shape: Vec<usize>,
    /// Byte range of the tensor data, relative to the start of the data section.
    offsets: (usize, usize),
}

/// A memory-mapped safetensors shard.
pub struct ShardFile {
    path: PathBuf,
    mmap: Mmap,
    /// Absolute offset of the data section (8-byte length prefix + header).
    data_start: usize,
    entries: Vec<ShardEntry>,
}

impl ShardFile {
    /// Open and memory-map a shard, and parse its header.
    pub fn open(path: &Path) -> Result<ShardFile> {
        let file = std::fs::File::open(path).map_err(|e| ModelError::weight_file(path, e))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| ModelError::weight_file(path, e))?;

        let (header_len, metadata) =
            SafeTensors::read_metadata(&mmap).map_err(|e| ModelError::weight_file(path, e))?;

        let mut entries: Vec<ShardEntry> = metadata
            .tensors()
            .into_iter()
            .map(|(name, info)| ShardEntry {
                name,
                dtype: info.dtype,
                shape: info.shape.clone(),
                offsets: info.data_offsets,
            })
            .collect();
        // Storage order. Writers group tensors by dtype and sort by name
        // within a group, so for a single-dtype shard this is name order.
        entries.sort_by(|a, b| a.offsets.0.cmp(&b.offsets.0).then_with(|| a.name.cmp(&b.name)));

        Ok(ShardFile {
            path: path.to_path_buf(),
            mmap,
            data_start: 8 + header_len,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header entries in storage order (ascending data offset, ties broken by name).
    pub fn entries(&self) -> &[ShardEntry] {
        &self.entries
    }

    /// Decode one tensor, still in its on-disk dtype.
    pub fn read(&self, entry: &ShardEntry) -> Result<Tensor> {
        let dtype = match entry.dtype {
            Dtype::F32 => DType::F32,
            Dtype::F16 => DType::F16,
            Dtype::BF16 => DType::BF16,
            other => {
                return Err(ModelError::weight_file(
                    &self.path,
                    format!("tensor '{}' has unsupported dtype {:?}", entry.name, other),
                ))
            }
        };
        let (begin, end) = entry.offsets;
        let bytes = self
            .mmap
            .get(self.data_start + begin..self.data_start + end)
            .ok_or_else(|| {
                ModelError::weight_file(
                    &self.path,
                    format!("tensor '{}' data lies outside the file", entry.name),
                )
            })?;
        let storage = CpuStorage::from_le_bytes(dtype, bytes)
            .map_err(|e| ModelError::weight_file(&self.path, format!("tensor '{}': {}", entry.name, e)))?;
        Tensor::from_storage(storage, &entry.shape)
            .map_err(|e| ModelError::weight_file(&self.path, format!("tensor '{}': {}", entry.name, e)))
    }
}
