//! `qs-tensor` - Tensor storage and compute backends for qwen-session.
//!
//! This crate provides:
//! - A `Tensor` view type over shared CPU storage (F32, F16, BF16)
//! - Strided layouts, dtype normalization to f32, and contiguous materialization
//! - A `ComputeBackend` trait and the reference `CpuBackend`

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use layout::Layout;
pub use storage::CpuStorage;
pub use tensor::Tensor;
