use std::sync::Arc;

use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::layout::Layout;
use crate::storage::CpuStorage;

/// A possibly strided view over shared CPU storage.
///
/// Views produced by [`Tensor::transpose`] share storage with their source.
/// Before a buffer is handed to anything that expects flat row-major data it
/// must go through [`Tensor::contiguous`].
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: Arc<CpuStorage>,
    layout: Layout,
}

impl Tensor {
    /// Create a contiguous f32 tensor.
    ///
    /// # Errors
    /// Returns an error if `data.len()` does not match the product of `dims`.
    pub fn new(data: Vec<f32>, dims: &[usize]) -> Result<Self> {
        Self::from_storage(CpuStorage::from_f32_vec(data), dims)
    }

    /// Wrap existing storage in a contiguous layout.
    ///
    /// # Errors
    /// Returns an error if the storage length does not match the product of `dims`.
    pub fn from_storage(storage: CpuStorage, dims: &[usize]) -> Result<Self> {
        let layout = Layout::contiguous(dims);
        if storage.len() != layout.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: dims.to_vec(),
                got: vec![storage.len()],
            });
        }
        Ok(Tensor {
            storage: Arc::new(storage),
            layout,
        })
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn numel(&self) -> usize {
        self.layout.numel()
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// Swap two axes. The result shares storage with `self`.
    pub fn transpose(&self, a: usize, b: usize) -> Result<Tensor> {
        Ok(Tensor {
            storage: Arc::clone(&self.storage),
            layout: self.layout.transpose(a, b)?,
        })
    }

    /// Convert the element type to f32, keeping the layout unchanged.
    ///
    /// F32 tensors are returned without copying.
    pub fn to_f32(&self) -> Tensor {
        if self.dtype() == DType::F32 {
            return self.clone();
        }
        Tensor {
            storage: Arc::new(self.storage.to_f32()),
            layout: self.layout.clone(),
        }
    }

    /// Materialize the view into fresh row-major storage.
    ///
    /// Already contiguous tensors are returned without copying.
    pub fn contiguous(&self) -> Tensor {
        if self.is_contiguous() {
            return self.clone();
        }
        let storage = match self.storage.as_ref() {
            CpuStorage::F32(v) => CpuStorage::F32(gather(v, &self.layout)),
            CpuStorage::F16(v) => CpuStorage::F16(gather(v, &self.layout)),
            CpuStorage::BF16(v) => CpuStorage::BF16(gather(v, &self.layout)),
        };
        Tensor {
            storage: Arc::new(storage),
            layout: Layout::contiguous(self.layout.dims()),
        }
    }

    /// Borrow the data as a flat f32 slice.
    ///
    /// # Errors
    /// Returns an error if the tensor is not F32 or not contiguous.
    pub fn as_f32_slice(&self) -> Result<&[f32]> {
        if !self.is_contiguous() {
            return Err(TensorError::NotContiguous {
                shape: self.layout.dims().to_vec(),
                strides: self.layout.strides().to_vec(),
            });
        }
        let data = self.storage.as_f32_slice()?;
        Ok(&data[..self.numel()])
    }

    /// Read every element in logical order, widened to f32.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.layout
            .storage_indices()
            .map(|i| self.storage.get_f32(i))
            .collect()
    }

    /// Returns the underlying storage reference.
    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }
}

fn gather<T: Copy>(data: &[T], layout: &Layout) -> Vec<T> {
    layout.storage_indices().map(|i| data[i]).collect()
}
