use crate::engine::EngineError;

/// Keys and values of one layer, `[max_seq_len, kv_dim]` row-major.
struct LayerCache {
    k: Vec<f32>,
    v: Vec<f32>,
}

/// Key-value cache sized for the full context window.
///
/// Rows are written at their absolute position; attention at position `p`
/// reads rows `0..=p`. Rows past the current position may hold stale data from
/// an earlier sequence and are never read.
pub struct KvCache {
    layers: Vec<LayerCache>,
    kv_dim: usize,
    max_seq_len: usize,
    len: usize,
}

impl KvCache {
    pub fn new(n_layers: usize, kv_dim: usize, max_seq_len: usize) -> Self {
        let layers = (0..n_layers)
            .map(|_| LayerCache {
                k: vec![0.0; max_seq_len * kv_dim],
                v: vec![0.0; max_seq_len * kv_dim],
            })
            .collect();
        KvCache {
            layers,
            kv_dim,
            max_seq_len,
            len: 0,
        }
    }

    /// Store one position's key and value rows for `layer`.
    pub fn write(&mut self, layer: usize, pos: usize, k: &[f32], v: &[f32]) -> Result<(), EngineError> {
        if pos >= self.max_seq_len {
            return Err(EngineError::PositionOutOfRange {
                pos,
                max_seq_len: self.max_seq_len,
            });
        }
        if k.len() != self.kv_dim || v.len() != self.kv_dim {
            return Err(EngineError::Other(format!(
                "kv row has {}/{} elements, expected {}",
                k.len(),
                v.len(),
                self.kv_dim
            )));
        }
        let cache = &mut self.layers[layer];
        let start = pos * self.kv_dim;
        cache.k[start..start + self.kv_dim].copy_from_slice(k);
        cache.v[start..start + self.kv_dim].copy_from_slice(v);
        self.len = self.len.max(pos + 1);
        Ok(())
    }

    /// Keys for positions `0..seq_len`.
    pub fn keys(&self, layer: usize, seq_len: usize) -> &[f32] {
        &self.layers[layer].k[..seq_len * self.kv_dim]
    }

    /// Values for positions `0..seq_len`.
    pub fn values(&self, layer: usize, seq_len: usize) -> &[f32] {
        &self.layers[layer].v[..seq_len * self.kv_dim]
    }

    /// Highest written position plus one.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn reset(&mut self) {
        for layer in &mut self.layers {
            layer.k.fill(0.0);
            layer.v.fill(0.0);
        }
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_back() {
        let mut cache = KvCache::new(2, 3, 4);
        cache.write(1, 0, &[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]).unwrap();
        cache.write(1, 1, &[7.0, 8.0, 9.0], &[0.0, 0.0, 1.0]).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys(1, 2), &[1.0, 2.0, 3.0, 7.0, 8.0, 9.0]);
        assert_eq!(cache.values(1, 1), &[4.0, 5.0, 6.0]);
        assert_eq!(cache.keys(0, 1), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_position_past_window() {
        let mut cache = KvCache::new(1, 2, 2);
        assert!(matches!(
            cache.write(0, 2, &[0.0; 2], &[0.0; 2]),
            Err(EngineError::PositionOutOfRange { pos: 2, max_seq_len: 2 })
        ));
    }

    #[test]
    fn test_reset() {
        let mut cache = KvCache::new(1, 1, 2);
        cache.write(0, 1, &[3.0], &[3.0]).unwrap();
        cache.reset();
        assert!(cache.is_empty());
        assert_eq!(cache.keys(0, 2), &[0.0, 0.0]);
    }
}
