use serde::{Deserialize, Serialize};

/// Settings for stochastic token selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Logit divisor; 0 selects greedily.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Keep only the k most likely tokens (None = disabled).
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Nucleus threshold; 1.0 disables it.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Seed for the selection RNG.
    #[serde(default)]
    pub seed: u64,
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    1.0
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_k: None,
            top_p: default_top_p(),
            seed: 0,
        }
    }
}

impl SamplingParams {
    /// Parameters that always pick the highest logit.
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            ..Default::default()
        }
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let params: SamplingParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, SamplingParams::default());
        assert!(!params.is_greedy());
    }

    #[test]
    fn test_partial_json() {
        let params: SamplingParams =
            serde_json::from_str(r#"{"temperature": 0.0, "top_k": 5, "seed": 9}"#).unwrap();
        assert!(params.is_greedy());
        assert_eq!(params.top_k, Some(5));
        assert_eq!(params.top_p, 1.0);
        assert_eq!(params.seed, 9);
    }
}
