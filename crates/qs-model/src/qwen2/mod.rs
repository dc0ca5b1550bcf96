//! Reference CPU engine for Qwen2-style decoders.

pub mod kv_cache;
pub mod weights;

pub use kv_cache::KvCache;
pub use weights::{expected_dims, layer_weight_name, parameter_table, LayerParam, Qwen2Weights};

use std::sync::Arc;

use qs_tensor::{ComputeBackend, CpuBackend};

use crate::config::ModelConfig;
use crate::engine::{Engine, EngineError, EngineFactory};
use weights::{EMBED_TOKENS, FINAL_NORM, LM_HEAD};

/// Creates [`Qwen2Engine`]s on a shared CPU backend.
#[derive(Debug, Clone)]
pub struct CpuEngineFactory {
    backend: Arc<CpuBackend>,
}

impl CpuEngineFactory {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(CpuBackend::new()),
        }
    }
}

impl Default for CpuEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory for CpuEngineFactory {
    type Engine = Qwen2Engine;

    fn name(&self) -> &str {
        self.backend.name()
    }

    fn create(&self, config: &ModelConfig) -> Result<Qwen2Engine, EngineError> {
        Qwen2Engine::new(config.clone(), self.backend.clone())
    }
}

/// A Qwen2 decoder evaluated one token at a time.
///
/// Weights are registered by their HF parameter names; shapes are inferred
/// from the name and the config. `lm_head.weight` may be omitted, in which case
/// [`Engine::prepare`] ties the head to the token embedding.
pub struct Qwen2Engine {
    config: ModelConfig,
    backend: Arc<dyn ComputeBackend>,
    weights: Qwen2Weights,
    cache: KvCache,
    tied_embeddings: bool,
}

impl Qwen2Engine {
    /// Build an engine with an empty weight table and a zeroed KV cache.
    pub fn new(config: ModelConfig, backend: Arc<dyn ComputeBackend>) -> Result<Self, EngineError> {
        if config.n_heads == 0 || config.hidden_dim % config.n_heads != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "hidden_dim {} is not divisible by n_heads {}",
                config.hidden_dim, config.n_heads
            )));
        }
        if config.head_dim() % 2 != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "head_dim {} must be even for rotary embeddings",
                config.head_dim()
            )));
        }
        if config.n_kv_heads == 0 || config.n_heads % config.n_kv_heads != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "n_heads {} is not a multiple of n_kv_heads {}",
                config.n_heads, config.n_kv_heads
            )));
        }
        if config.max_seq_len == 0 {
            return Err(EngineError::InvalidConfig("max_seq_len must be positive".to_string()));
        }

        let cache = KvCache::new(
            config.n_layers,
            config.n_kv_heads * config.head_dim(),
            config.max_seq_len,
        );
        Ok(Qwen2Engine {
            config,
            backend,
            weights: Qwen2Weights::default(),
            cache,
            tied_embeddings: false,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn weights(&self) -> &Qwen2Weights {
        &self.weights
    }

    /// True once `prepare` found no separate LM head.
    pub fn tied_embeddings(&self) -> bool {
        self.tied_embeddings
    }

    fn lm_head(&self) -> Result<&[f32], EngineError> {
        if self.tied_embeddings {
            self.weights.get(EMBED_TOKENS)
        } else {
            self.weights.get(LM_HEAD)
        }
    }
}

/// y = W x + b for W of shape `[out_dim, in_dim]`.
fn linear(
    backend: &dyn ComputeBackend,
    w: &[f32],
    bias: Option<&[f32]>,
    x: &[f32],
    out_dim: usize,
    in_dim: usize,
) -> Result<Vec<f32>, EngineError> {
    let y = backend.matmul(w, x, out_dim, in_dim, 1)?;
    match bias {
        Some(b) => Ok(backend.add(&y, b)?),
        None => Ok(y),
    }
}

impl Engine for Qwen2Engine {
    fn register_weight(&mut self, name: &str, data: &[f32]) -> Result<(), EngineError> {
        let dims = expected_dims(name, &self.config)
            .ok_or_else(|| EngineError::UnknownWeight(name.to_string()))?;
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(EngineError::ShapeMismatch {
                name: name.to_string(),
                expected,
                got: data.len(),
            });
        }
        self.weights.insert(name, data.to_vec());
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), EngineError> {
        if !self.weights.contains(LM_HEAD) && self.weights.contains(EMBED_TOKENS) {
            tracing::info!("no {} in checkpoint, tying it to {}", LM_HEAD, EMBED_TOKENS);
            self.tied_embeddings = true;
        }
        Ok(())
    }

    fn forward(&mut self, token: u32, pos: usize) -> Result<u32, EngineError> {
        let logits = self.forward_logits(token, pos)?;
        let (index, _) = self.backend.argmax(&logits)?;
        Ok(index as u32)
    }

    /// Run one token through every decoder layer.
    ///
    /// Supports grouped-query attention, where several query heads share one
    /// key/value head.
    fn forward_logits(&mut self, token: u32, pos: usize) -> Result<Vec<f32>, EngineError> {
        let cfg = &self.config;
        if pos >= cfg.max_seq_len {
            return Err(EngineError::PositionOutOfRange {
                pos,
                max_seq_len: cfg.max_seq_len,
            });
        }
        if token as usize >= cfg.vocab_size {
            return Err(EngineError::TokenOutOfRange {
                token,
                vocab_size: cfg.vocab_size,
            });
        }

        let backend = self.backend.as_ref();
        let weights = &self.weights;
        let hidden_dim = cfg.hidden_dim;
        let head_dim = cfg.head_dim();
        let n_heads = cfg.n_heads;
        let n_kv_heads = cfg.n_kv_heads;
        let q_dim = n_heads * head_dim;
        let kv_dim = n_kv_heads * head_dim;
        let heads_per_kv = n_heads / n_kv_heads;
        let eps = cfg.rms_norm_eps;
        let scale = 1.0 / (head_dim as f32).sqrt();
        let seq_len = pos + 1;

        let embed = weights.get(EMBED_TOKENS)?;
        let offset = token as usize * hidden_dim;
        let mut hidden = embed[offset..offset + hidden_dim].to_vec();

        for layer in 0..cfg.n_layers {
            let w = move |p: LayerParam| weights.require(layer, p);
            let bias = move |p: LayerParam| weights.layer(layer, p);

            // Attention block.
            let normed = backend.rms_norm(&hidden, w(LayerParam::InputNorm)?, eps, hidden_dim)?;
            let q = linear(backend, w(LayerParam::QProj)?, bias(LayerParam::QBias)?, &normed, q_dim, hidden_dim)?;
            let k = linear(backend, w(LayerParam::KProj)?, bias(LayerParam::KBias)?, &normed, kv_dim, hidden_dim)?;
            let v = linear(backend, w(LayerParam::VProj)?, bias(LayerParam::VBias)?, &normed, kv_dim, hidden_dim)?;

            let q = backend.rope(&q, n_heads, head_dim, pos, cfg.rope_theta)?;
            let k = backend.rope(&k, n_kv_heads, head_dim, pos, cfg.rope_theta)?;

            self.cache.write(layer, pos, &k, &v)?;
            let cached_k = self.cache.keys(layer, seq_len);
            let cached_v = self.cache.values(layer, seq_len);

            let mut context = vec![0.0f32; q_dim];
            for h in 0..n_heads {
                let kv_h = h / heads_per_kv;
                let q_head = &q[h * head_dim..(h + 1) * head_dim];

                let scores: Vec<f32> = (0..seq_len)
                    .map(|s| {
                        let k_row = &cached_k[s * kv_dim + kv_h * head_dim..][..head_dim];
                        q_head.iter().zip(k_row).map(|(a, b)| a * b).sum::<f32>()
                    })
                    .collect();
                let scores = backend.scale(&scores, scale)?;
                // Causal by construction: the cache holds positions 0..=pos only.
                let probs = backend.softmax(&scores, seq_len)?;

                let out = &mut context[h * head_dim..(h + 1) * head_dim];
                for (s, &p) in probs.iter().enumerate() {
                    let v_row = &cached_v[s * kv_dim + kv_h * head_dim..][..head_dim];
                    for (o, &vv) in out.iter_mut().zip(v_row) {
                        *o += p * vv;
                    }
                }
            }

            let attn_out = linear(backend, w(LayerParam::OProj)?, None, &context, hidden_dim, q_dim)?;
            hidden = backend.add(&hidden, &attn_out)?;

            // MLP block (SwiGLU).
            let normed = backend.rms_norm(&hidden, w(LayerParam::PostAttentionNorm)?, eps, hidden_dim)?;
            let n_ff = cfg.intermediate_dim;
            let gate = linear(backend, w(LayerParam::GateProj)?, None, &normed, n_ff, hidden_dim)?;
            let up = linear(backend, w(LayerParam::UpProj)?, None, &normed, n_ff, hidden_dim)?;
            let act = backend.mul(&backend.silu(&gate)?, &up)?;
            let down = linear(backend, w(LayerParam::DownProj)?, None, &act, hidden_dim, n_ff)?;
            hidden = backend.add(&hidden, &down)?;
        }

        let normed = backend.rms_norm(&hidden, weights.get(FINAL_NORM)?, eps, hidden_dim)?;
        linear(backend, self.lm_head()?, None, &normed, cfg.vocab_size, hidden_dim)
    }

    fn reset(&mut self) {
        self.cache.reset();
    }
}
