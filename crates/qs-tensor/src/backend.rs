use std::fmt::Debug;

use crate::error::Result;

/// Trait for pluggable compute backends.
///
/// All operations work on contiguous f32 slices. Data is passed in as slices
/// and returned as owned vectors.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;

    /// Element-wise addition: result[i] = a[i] + b[i].
    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Element-wise multiplication: result[i] = a[i] * b[i].
    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Scalar multiplication: result[i] = a[i] * s.
    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>>;

    /// RMS normalization.
    ///
    /// For each row of `hidden_size` elements in `x`:
    ///   rms = sqrt(mean(x^2) + eps)
    ///   result[i] = x[i] * weight[i] / rms
    fn rms_norm(
        &self,
        x: &[f32],
        weight: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>>;

    /// Softmax over chunks of `n` elements.
    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>>;

    /// Rotary position embedding over `n_heads` heads of `head_dim` each.
    ///
    /// Uses the half-split pairing of HF checkpoints: element `j` of a head is
    /// rotated together with element `j + head_dim / 2`, at angle
    /// `pos * theta^(-2j / head_dim)`.
    fn rope(
        &self,
        x: &[f32],
        n_heads: usize,
        head_dim: usize,
        pos: usize,
        theta: f32,
    ) -> Result<Vec<f32>>;

    /// SiLU activation: result[i] = x[i] / (1 + exp(-x[i])).
    fn silu(&self, x: &[f32]) -> Result<Vec<f32>>;

    /// Index and value of the largest element. Ties resolve to the lowest index.
    fn argmax(&self, x: &[f32]) -> Result<(usize, f32)>;
}
