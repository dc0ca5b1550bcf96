use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

/// Pure-Rust CPU compute backend.
///
/// Straightforward loops, written for correctness rather than peak throughput.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check_same_len(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(TensorError::ShapeMismatch {
            expected: vec![a.len()],
            got: vec![b.len()],
        });
    }
    Ok(())
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
        if a.len() != m * k {
            return Err(TensorError::Other(format!(
                "matmul: a.len()={} but expected m*k={}",
                a.len(),
                m * k
            )));
        }
        if b.len() != k * n {
            return Err(TensorError::Other(format!(
                "matmul: b.len()={} but expected k*n={}",
                b.len(),
                k * n
            )));
        }

        let mut c = vec![0.0f32; m * n];
        for i in 0..m {
            let row = &a[i * k..(i + 1) * k];
            for j in 0..n {
                let mut sum = 0.0f32;
                for (p, &av) in row.iter().enumerate() {
                    sum += av * b[p * n + j];
                }
                c[i * n + j] = sum;
            }
        }
        Ok(c)
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        check_same_len(a, b)?;
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x + y).collect())
    }

    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        check_same_len(a, b)?;
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).collect())
    }

    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>> {
        Ok(a.iter().map(|x| x * s).collect())
    }

    fn rms_norm(
        &self,
        x: &[f32],
        weight: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>> {
        if hidden_size == 0 || weight.len() != hidden_size {
            return Err(TensorError::Other(format!(
                "rms_norm: weight.len()={} but hidden_size={}",
                weight.len(),
                hidden_size
            )));
        }
        if x.len() % hidden_size != 0 {
            return Err(TensorError::Other(format!(
                "rms_norm: x.len()={} is not a multiple of hidden_size={}",
                x.len(),
                hidden_size
            )));
        }

        let mut result = Vec::with_capacity(x.len());
        for row in x.chunks_exact(hidden_size) {
            let mean_sq: f32 = row.iter().map(|v| v * v).sum::<f32>() / hidden_size as f32;
            let rms = (mean_sq + eps).sqrt();
            result.extend(row.iter().zip(weight).map(|(v, w)| v * w / rms));
        }
        Ok(result)
    }

    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>> {
        if n == 0 {
            return Err(TensorError::Other("softmax: n must be > 0".to_string()));
        }
        if x.len() % n != 0 {
            return Err(TensorError::Other(format!(
                "softmax: x.len()={} is not a multiple of n={}",
                x.len(),
                n
            )));
        }

        let mut result = Vec::with_capacity(x.len());
        for chunk in x.chunks_exact(n) {
            let max_val = chunk.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = chunk.iter().map(|&v| (v - max_val).exp()).collect();
            let sum: f32 = exps.iter().sum();
            result.extend(exps.into_iter().map(|e| e / sum));
        }
        Ok(result)
    }

    fn rope(
        &self,
        x: &[f32],
        n_heads: usize,
        head_dim: usize,
        pos: usize,
        theta: f32,
    ) -> Result<Vec<f32>> {
        if x.len() != n_heads * head_dim {
            return Err(TensorError::Other(format!(
                "rope: x.len()={} but expected n_heads*head_dim={}",
                x.len(),
                n_heads * head_dim
            )));
        }
        if head_dim % 2 != 0 {
            return Err(TensorError::Other(format!(
                "rope: head_dim={} must be even",
                head_dim
            )));
        }

        let half = head_dim / 2;
        let mut out = x.to_vec();
        for h in 0..n_heads {
            let offset = h * head_dim;
            for j in 0..half {
                // Angles in f64 keep long positions from drifting.
                let freq = (theta as f64).powf(-2.0 * j as f64 / head_dim as f64);
                let angle = pos as f64 * freq;
                let (sin, cos) = (angle.sin() as f32, angle.cos() as f32);

                let a = x[offset + j];
                let b = x[offset + half + j];
                out[offset + j] = a * cos - b * sin;
                out[offset + half + j] = b * cos + a * sin;
            }
        }
        Ok(out)
    }

    fn silu(&self, x: &[f32]) -> Result<Vec<f32>> {
        Ok(x.iter().map(|&v| v / (1.0 + (-v).exp())).collect())
    }

    fn argmax(&self, x: &[f32]) -> Result<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &v) in x.iter().enumerate() {
            match best {
                Some((_, b)) if v <= b => {}
                _ => best = Some((i, v)),
            }
        }
        best.ok_or_else(|| TensorError::Other("argmax of empty slice".to_string()))
    }
}
