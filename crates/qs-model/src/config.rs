use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{ModelError, Result};

/// Vocabulary size assumed when the metadata does not carry one.
pub const DEFAULT_VOCAB_SIZE: usize = 151_936;

/// Operating ceiling on sequence length.
///
/// The model's own `max_position_embeddings` is deliberately not consulted:
/// every session runs with this cap, and the engine sizes its KV cache to it.
pub const MAX_SEQ_LEN: usize = 2048;

/// RoPE base used when the metadata does not specify `rope_theta`.
pub const DEFAULT_ROPE_THETA: f32 = 1.0e6;

/// RMSNorm epsilon used when the metadata does not specify `rms_norm_eps`.
pub const DEFAULT_RMS_NORM_EPS: f32 = 1.0e-6;

/// Loosely-typed model description, as found in a checkpoint's `config.json`.
///
/// Any keys are accepted; only the ones [`ModelConfig::from_metadata`] reads
/// matter.
#[derive(Debug, Clone, Default)]
pub struct ModelMetadata {
    pub entries: Map<String, Value>,
}

impl ModelMetadata {
    /// Parse metadata from a JSON object.
    pub fn from_json_str(json: &str) -> Result<ModelMetadata> {
        let entries: Map<String, Value> = serde_json::from_str(json)?;
        Ok(ModelMetadata { entries })
    }

    /// Read and parse a `config.json` file.
    pub fn from_file(path: &Path) -> Result<ModelMetadata> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Insert or replace a single key. Convenient for building metadata in code.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.entries.insert(key.to_string(), value.into());
        self
    }

    /// Retrieve a required positive integer.
    pub fn get_usize(&self, key: &str) -> Result<usize> {
        match self.entries.get(key) {
            Some(v) => positive_usize(key, v),
            None => Err(ModelError::ConfigMissingField(key.to_string())),
        }
    }

    /// Retrieve an optional positive integer.
    pub fn get_opt_usize(&self, key: &str) -> Result<Option<usize>> {
        match self.entries.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => positive_usize(key, v).map(Some),
        }
    }

    /// Retrieve an optional positive, finite float.
    pub fn get_opt_f32(&self, key: &str) -> Result<Option<f32>> {
        match self.entries.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => {
                let f = v
                    .as_f64()
                    .ok_or_else(|| ModelError::invalid(key, format!("expected a number, got {}", v)))?;
                if !f.is_finite() || f <= 0.0 {
                    return Err(ModelError::invalid(key, format!("must be positive, got {}", f)));
                }
                Ok(Some(f as f32))
            }
        }
    }
}

fn positive_usize(key: &str, v: &Value) -> Result<usize> {
    if let Some(n) = v.as_u64() {
        if n == 0 {
            return Err(ModelError::invalid(key, "must be positive, got 0"));
        }
        return usize::try_from(n).map_err(|_| ModelError::invalid(key, format!("{} overflows usize", n)));
    }
    if let Some(n) = v.as_i64() {
        return Err(ModelError::invalid(key, format!("must be positive, got {}", n)));
    }
    Err(ModelError::invalid(
        key,
        format!("expected a positive integer, got {}", v),
    ))
}

/// Validated, engine-ready model configuration.
///
/// Produced once by [`ModelConfig::from_metadata`] and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Vocabulary size (rows of the embedding and LM head).
    pub vocab_size: usize,
    /// Hidden size.
    pub hidden_dim: usize,
    /// Feed-forward intermediate size.
    pub intermediate_dim: usize,
    /// Number of transformer layers.
    pub n_layers: usize,
    /// Number of query heads.
    pub n_heads: usize,
    /// Number of key/value heads (GQA).
    pub n_kv_heads: usize,
    /// Sequence-length ceiling, always [`MAX_SEQ_LEN`] when translated from metadata.
    pub max_seq_len: usize,
    /// RoPE frequency base.
    pub rope_theta: f32,
    /// RMSNorm epsilon.
    pub rms_norm_eps: f32,
}

impl ModelConfig {
    /// Translate checkpoint metadata into a config.
    ///
    /// Reads the following keys:
    /// - `hidden_size` -> hidden_dim (required)
    /// - `intermediate_size` -> intermediate_dim (required)
    /// - `num_hidden_layers` -> n_layers (required)
    /// - `num_attention_heads` -> n_heads (required)
    /// - `num_key_value_heads` -> n_kv_heads (required)
    /// - `vocab_size` -> vocab_size (default [`DEFAULT_VOCAB_SIZE`])
    /// - `rope_theta`, `rms_norm_eps` (defaults [`DEFAULT_ROPE_THETA`], [`DEFAULT_RMS_NORM_EPS`])
    ///
    /// `max_seq_len` is always [`MAX_SEQ_LEN`].
    pub fn from_metadata(metadata: &ModelMetadata) -> Result<ModelConfig> {
        let hidden_dim = metadata.get_usize("hidden_size")?;
        let intermediate_dim = metadata.get_usize("intermediate_size")?;
        let n_layers = metadata.get_usize("num_hidden_layers")?;
        let n_heads = metadata.get_usize("num_attention_heads")?;
        let n_kv_heads = metadata.get_usize("num_key_value_heads")?;

        let vocab_size = metadata
            .get_opt_usize("vocab_size")?
            .unwrap_or(DEFAULT_VOCAB_SIZE);
        let rope_theta = metadata
            .get_opt_f32("rope_theta")?
            .unwrap_or(DEFAULT_ROPE_THETA);
        let rms_norm_eps = metadata
            .get_opt_f32("rms_norm_eps")?
            .unwrap_or(DEFAULT_RMS_NORM_EPS);

        if n_kv_heads > n_heads {
            return Err(ModelError::invalid(
                "num_key_value_heads",
                format!("{} exceeds num_attention_heads {}", n_kv_heads, n_heads),
            ));
        }

        Ok(ModelConfig {
            vocab_size,
            hidden_dim,
            intermediate_dim,
            n_layers,
            n_heads,
            n_kv_heads,
            max_seq_len: MAX_SEQ_LEN,
            rope_theta,
            rms_norm_eps,
        })
    }

    /// Dimension of each attention head.
    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.n_heads
    }
}
