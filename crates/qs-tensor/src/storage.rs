use half::{bf16, f16};

use crate::dtype::DType;
use crate::error::{Result, TensorError};

/// CPU-side tensor storage.
///
/// Checkpoint data arrives in whatever precision it was saved in; engines only
/// ever see the `F32` variant.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    /// 32-bit floating point storage.
    F32(Vec<f32>),
    /// Half precision storage.
    F16(Vec<f16>),
    /// Brain float storage.
    BF16(Vec<bf16>),
}

impl CpuStorage {
    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            CpuStorage::F32(v) => v.len(),
            CpuStorage::F16(v) => v.len(),
            CpuStorage::BF16(v) => v.len(),
        }
    }

    /// Returns true if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the data as an f32 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not F32.
    pub fn as_f32_slice(&self) -> Result<&[f32]> {
        match self {
            CpuStorage::F32(v) => Ok(v.as_slice()),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::F32.to_string(),
                got: other.dtype().to_string(),
            }),
        }
    }

    /// Create storage from an f32 vector.
    pub fn from_f32_vec(data: Vec<f32>) -> Self {
        CpuStorage::F32(data)
    }

    /// Decode little-endian element bytes of the given dtype.
    ///
    /// # Errors
    /// Returns an error if `bytes` is not a whole number of elements.
    pub fn from_le_bytes(dtype: DType, bytes: &[u8]) -> Result<Self> {
        let width = dtype.size_in_bytes();
        if bytes.len() % width != 0 {
            let numel = bytes.len() / width;
            return Err(TensorError::ByteLength {
                dtype: dtype.to_string(),
                numel,
                expected: numel * width,
                got: bytes.len(),
            });
        }

        let storage = match dtype {
            DType::F32 => CpuStorage::F32(
                bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
            DType::F16 => CpuStorage::F16(
                bytes
                    .chunks_exact(2)
                    .map(|b| f16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            ),
            DType::BF16 => CpuStorage::BF16(
                bytes
                    .chunks_exact(2)
                    .map(|b| bf16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            ),
        };
        Ok(storage)
    }

    /// Read element `i` widened to f32.
    ///
    /// # Panics
    /// Panics if `i >= len()`.
    pub fn get_f32(&self, i: usize) -> f32 {
        match self {
            CpuStorage::F32(v) => v[i],
            CpuStorage::F16(v) => v[i].to_f32(),
            CpuStorage::BF16(v) => v[i].to_f32(),
        }
    }

    /// Upcast every element to f32, preserving element order.
    pub fn to_f32(&self) -> CpuStorage {
        match self {
            CpuStorage::F32(v) => CpuStorage::F32(v.clone()),
            CpuStorage::F16(v) => CpuStorage::F32(v.iter().map(|h| h.to_f32()).collect()),
            CpuStorage::BF16(v) => CpuStorage::F32(v.iter().map(|h| h.to_f32()).collect()),
        }
    }

    /// Returns the dtype of this storage.
    pub fn dtype(&self) -> DType {
        match self {
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F16(_) => DType::F16,
            CpuStorage::BF16(_) => DType::BF16,
        }
    }
}
