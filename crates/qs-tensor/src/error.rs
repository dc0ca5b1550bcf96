use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: String, got: String },
    #[error("invalid axis {axis} for tensor with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },
    #[error("byte length {got} is not valid for {numel} elements of {dtype} (expected {expected})")]
    ByteLength {
        dtype: String,
        numel: usize,
        expected: usize,
        got: usize,
    },
    #[error("tensor is not contiguous (shape {shape:?}, strides {strides:?})")]
    NotContiguous {
        shape: Vec<usize>,
        strides: Vec<usize>,
    },
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
