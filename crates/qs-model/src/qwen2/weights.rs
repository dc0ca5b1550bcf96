use std::collections::HashMap;

use crate::config::ModelConfig;
use crate::engine::EngineError;

pub const EMBED_TOKENS: &str = "model.embed_tokens.weight";
pub const LM_HEAD: &str = "lm_head.weight";
pub const FINAL_NORM: &str = "model.norm.weight";

const LAYER_PREFIX: &str = "model.layers.";

/// Per-layer parameters of a Qwen2 decoder block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerParam {
    InputNorm,
    PostAttentionNorm,
    QProj,
    KProj,
    VProj,
    OProj,
    QBias,
    KBias,
    VBias,
    GateProj,
    UpProj,
    DownProj,
}

impl LayerParam {
    pub const ALL: [LayerParam; 12] = [
        LayerParam::InputNorm,
        LayerParam::QProj,
        LayerParam::QBias,
        LayerParam::KProj,
        LayerParam::KBias,
        LayerParam::VProj,
        LayerParam::VBias,
        LayerParam::OProj,
        LayerParam::PostAttentionNorm,
        LayerParam::GateProj,
        LayerParam::UpProj,
        LayerParam::DownProj,
    ];

    /// Name suffix after `model.layers.{i}.`.
    pub fn suffix(&self) -> &'static str {
        match self {
            LayerParam::InputNorm => "input_layernorm.weight",
            LayerParam::PostAttentionNorm => "post_attention_layernorm.weight",
            LayerParam::QProj => "self_attn.q_proj.weight",
            LayerParam::KProj => "self_attn.k_proj.weight",
            LayerParam::VProj => "self_attn.v_proj.weight",
            LayerParam::OProj => "self_attn.o_proj.weight",
            LayerParam::QBias => "self_attn.q_proj.bias",
            LayerParam::KBias => "self_attn.k_proj.bias",
            LayerParam::VBias => "self_attn.v_proj.bias",
            LayerParam::GateProj => "mlp.gate_proj.weight",
            LayerParam::UpProj => "mlp.up_proj.weight",
            LayerParam::DownProj => "mlp.down_proj.weight",
        }
    }

    fn from_suffix(suffix: &str) -> Option<LayerParam> {
        LayerParam::ALL.into_iter().find(|p| p.suffix() == suffix)
    }

    /// Biases may be absent from a checkpoint; everything else is required.
    pub fn is_optional(&self) -> bool {
        matches!(self, LayerParam::QBias | LayerParam::KBias | LayerParam::VBias)
    }

    /// Row-major dims of this parameter, `[out, in]` for projections.
    pub fn dims(&self, cfg: &ModelConfig) -> Vec<usize> {
        let hidden = cfg.hidden_dim;
        let q_dim = cfg.n_heads * cfg.head_dim();
        let kv_dim = cfg.n_kv_heads * cfg.head_dim();
        match self {
            LayerParam::InputNorm | LayerParam::PostAttentionNorm => vec![hidden],
            LayerParam::QProj => vec![q_dim, hidden],
            LayerParam::KProj | LayerParam::VProj => vec![kv_dim, hidden],
            LayerParam::OProj => vec![hidden, q_dim],
            LayerParam::QBias => vec![q_dim],
            LayerParam::KBias | LayerParam::VBias => vec![kv_dim],
            LayerParam::GateProj | LayerParam::UpProj => vec![cfg.intermediate_dim, hidden],
            LayerParam::DownProj => vec![hidden, cfg.intermediate_dim],
        }
    }
}

/// Full parameter name for layer `index`.
pub fn layer_weight_name(index: usize, param: LayerParam) -> String {
    format!("{}{}.{}", LAYER_PREFIX, index, param.suffix())
}

/// Expected dims for a parameter name, or `None` if the name is not part of
/// a Qwen2 checkpoint with this config.
pub fn expected_dims(name: &str, cfg: &ModelConfig) -> Option<Vec<usize>> {
    match name {
        EMBED_TOKENS | LM_HEAD => return Some(vec![cfg.vocab_size, cfg.hidden_dim]),
        FINAL_NORM => return Some(vec![cfg.hidden_dim]),
        _ => {}
    }

    let rest = name.strip_prefix(LAYER_PREFIX)?;
    let (raw, suffix) = rest.split_once('.')?;
    let index: usize = raw.parse().ok()?;
    // Only the canonical spelling; "00" or "+0" would be stored under a key
    // that forward never reads.
    if index.to_string() != raw || index >= cfg.n_layers {
        return None;
    }
    LayerParam::from_suffix(suffix).map(|p| p.dims(cfg))
}

/// Every parameter a complete checkpoint for `cfg` carries, with dims.
///
/// `lm_head.weight` is included; checkpoints with tied embeddings omit it.
pub fn parameter_table(cfg: &ModelConfig) -> Vec<(String, Vec<usize>)> {
    let mut table = vec![
        (EMBED_TOKENS.to_string(), vec![cfg.vocab_size, cfg.hidden_dim]),
        (LM_HEAD.to_string(), vec![cfg.vocab_size, cfg.hidden_dim]),
        (FINAL_NORM.to_string(), vec![cfg.hidden_dim]),
    ];
    for i in 0..cfg.n_layers {
        for param in LayerParam::ALL {
            table.push((layer_weight_name(i, param), param.dims(cfg)));
        }
    }
    table
}

/// Registered parameters, keyed by name.
#[derive(Debug, Default)]
pub struct Qwen2Weights {
    tensors: HashMap<String, Vec<f32>>,
}

impl Qwen2Weights {
    pub fn insert(&mut self, name: &str, data: Vec<f32>) {
        self.tensors.insert(name.to_string(), data);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Look up a required parameter.
    pub fn get(&self, name: &str) -> Result<&[f32], EngineError> {
        self.tensors
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| EngineError::MissingWeight(name.to_string()))
    }

    /// Look up a layer parameter that must be present.
    pub fn require(&self, index: usize, param: LayerParam) -> Result<&[f32], EngineError> {
        let name = layer_weight_name(index, param);
        self.tensors
            .get(&name)
            .map(Vec::as_slice)
            .ok_or(EngineError::MissingWeight(name))
    }

    /// Look up a layer parameter; optional ones yield `None` when absent.
    pub fn layer(&self, index: usize, param: LayerParam) -> Result<Option<&[f32]>, EngineError> {
        let name = layer_weight_name(index, param);
        match self.tensors.get(&name) {
            Some(v) => Ok(Some(v.as_slice())),
            None if param.is_optional() => Ok(None),
            None => Err(EngineError::MissingWeight(name)),
        }
    }
}
