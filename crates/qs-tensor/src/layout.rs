use std::fmt;

use crate::error::{Result, TensorError};

/// Dimensions, strides, and starting offset of a tensor view over flat storage.
///
/// Strides are counted in elements. A layout is contiguous when its strides are
/// the row-major strides of its dims and it starts at offset 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Layout {
    dims: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
}

impl Layout {
    /// Row-major layout for the given dims.
    pub fn contiguous(dims: &[usize]) -> Self {
        Layout {
            dims: dims.to_vec(),
            strides: row_major_strides(dims),
            offset: 0,
        }
    }

    /// Build an arbitrary strided layout.
    ///
    /// # Errors
    /// Returns an error if `dims` and `strides` differ in rank.
    pub fn strided(dims: &[usize], strides: &[usize], offset: usize) -> Result<Self> {
        if dims.len() != strides.len() {
            return Err(TensorError::ShapeMismatch {
                expected: dims.to_vec(),
                got: strides.to_vec(),
            });
        }
        Ok(Layout {
            dims: dims.to_vec(),
            strides: strides.to_vec(),
            offset,
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements. A rank-0 layout holds one element.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// True if elements are laid out row-major from offset 0 with no gaps.
    ///
    /// Size-1 dimensions are ignored, since their stride never contributes to
    /// an address.
    pub fn is_contiguous(&self) -> bool {
        if self.offset != 0 {
            return false;
        }
        let expected = row_major_strides(&self.dims);
        self.dims
            .iter()
            .zip(self.strides.iter().zip(expected.iter()))
            .all(|(&d, (&s, &e))| d == 1 || s == e)
    }

    /// Swap two axes without moving any data.
    ///
    /// # Errors
    /// Returns an error if either axis is out of range.
    pub fn transpose(&self, a: usize, b: usize) -> Result<Layout> {
        let ndim = self.ndim();
        for axis in [a, b] {
            if axis >= ndim {
                return Err(TensorError::InvalidAxis { axis, ndim });
            }
        }
        let mut out = self.clone();
        out.dims.swap(a, b);
        out.strides.swap(a, b);
        Ok(out)
    }

    /// Storage indices of every element, in logical row-major order.
    pub fn storage_indices(&self) -> StorageIndices<'_> {
        StorageIndices {
            layout: self,
            counter: vec![0; self.dims.len()],
            remaining: self.numel(),
        }
    }
}

/// Row-major strides: for dims `[d0, d1, d2]` the strides are `[d1*d2, d2, 1]`.
fn row_major_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// Iterator over the storage index of each element of a [`Layout`].
pub struct StorageIndices<'a> {
    layout: &'a Layout,
    counter: Vec<usize>,
    remaining: usize,
}

impl Iterator for StorageIndices<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let index = self.layout.offset
            + self
                .counter
                .iter()
                .zip(&self.layout.strides)
                .map(|(c, s)| c * s)
                .sum::<usize>();

        // Advance the multi-dimensional counter, last axis fastest.
        for axis in (0..self.counter.len()).rev() {
            self.counter[axis] += 1;
            if self.counter[axis] < self.layout.dims[axis] {
                break;
            }
            self.counter[axis] = 0;
        }

        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)?;
        if !self.is_contiguous() {
            write!(f, " strides={:?} offset={}", self.strides, self.offset)?;
        }
        Ok(())
    }
}
