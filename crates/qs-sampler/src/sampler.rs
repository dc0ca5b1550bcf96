use crate::greedy::{DistSampler, GreedySampler};
use crate::params::SamplingParams;
use crate::temperature::TemperatureSampler;
use crate::top_k::TopKSampler;
use crate::top_p::TopPSampler;

/// A token ID paired with its logit value.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenLogit {
    pub token_id: u32,
    pub logit: f32,
}

/// Trait for samplers that modify or select from a set of token logits.
pub trait Sampler: Send {
    /// Returns the name of this sampler.
    fn name(&self) -> &str;

    /// Modify logits in-place (filtering, scaling, selecting).
    ///
    /// Takes `&mut self` so selectors can advance their RNG.
    fn apply(&mut self, logits: &mut Vec<TokenLogit>);

    /// Reset any internal state. Default implementation does nothing.
    fn reset(&mut self) {}
}

/// Sort descending by logit; NaNs compare equal.
pub(crate) fn sort_descending(logits: &mut [TokenLogit]) {
    logits.sort_by(|a, b| b.logit.partial_cmp(&a.logit).unwrap_or(std::cmp::Ordering::Equal));
}

/// Composes multiple samplers into a pipeline.
/// The last sampler in the chain should be a selector (greedy or random).
pub struct SamplerChain {
    samplers: Vec<Box<dyn Sampler>>,
}

impl SamplerChain {
    /// Create a new empty sampler chain.
    pub fn new() -> Self {
        Self {
            samplers: Vec::new(),
        }
    }

    /// Build the standard chain for `params`:
    /// temperature -> top-k -> top-p -> seeded distribution.
    ///
    /// A temperature of zero selects greedily instead.
    pub fn from_params(params: &SamplingParams) -> Self {
        if params.is_greedy() {
            return Self::new().with(Box::new(GreedySampler::new()));
        }

        let mut chain = Self::new().with(Box::new(TemperatureSampler::new(params.temperature)));
        if let Some(k) = params.top_k {
            chain = chain.with(Box::new(TopKSampler::new(k)));
        }
        if params.top_p < 1.0 {
            chain = chain.with(Box::new(TopPSampler::new(params.top_p)));
        }
        chain.with(Box::new(DistSampler::new(params.seed)))
    }

    /// Add a sampler to the end of the chain. Returns self for builder-style usage.
    pub fn with(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.samplers.push(sampler);
        self
    }

    /// Names of the samplers in application order.
    #[cfg(test)]
    fn names(&self) -> Vec<&str> {
        self.samplers.iter().map(|s| s.name()).collect()
    }

    /// Run all samplers in order on raw logits, return the selected token ID.
    ///
    /// 1. Converts the `&[f32]` logits into `Vec<TokenLogit>` (token_id = index).
    /// 2. Applies each sampler in sequence.
    /// 3. Returns the first remaining token's id, or `None` for empty logits.
    pub fn sample(&mut self, logits: &[f32]) -> Option<u32> {
        let mut token_logits: Vec<TokenLogit> = logits
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenLogit {
                token_id: i as u32,
                logit,
            })
            .collect();

        for sampler in &mut self.samplers {
            sampler.apply(&mut token_logits);
        }

        token_logits.first().map(|t| t.token_id)
    }
}

impl Default for SamplerChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_chain_returns_first_index() {
        let mut chain = SamplerChain::new();
        assert_eq!(chain.sample(&[0.1, 5.0]), Some(0));
        assert_eq!(chain.sample(&[]), None);
    }

    #[test]
    fn test_greedy_chain() {
        let mut chain = SamplerChain::new().with(Box::new(GreedySampler::new()));
        assert_eq!(chain.sample(&[0.1, 5.0, -2.0, 4.9]), Some(1));
    }

    #[test]
    fn test_from_params_order() {
        let params = SamplingParams {
            temperature: 0.7,
            top_k: Some(40),
            top_p: 0.9,
            seed: 3,
        };
        let chain = SamplerChain::from_params(&params);
        assert_eq!(chain.names(), vec!["temperature", "top_k", "top_p", "dist"]);

        let chain = SamplerChain::from_params(&SamplingParams::default());
        assert_eq!(chain.names(), vec!["temperature", "dist"]);

        let chain = SamplerChain::from_params(&SamplingParams::greedy());
        assert_eq!(chain.names(), vec!["greedy"]);
    }

    #[test]
    fn test_top_k_one_is_deterministic() {
        let params = SamplingParams {
            top_k: Some(1),
            ..SamplingParams::default()
        };
        let mut chain = SamplerChain::from_params(&params);
        for _ in 0..10 {
            assert_eq!(chain.sample(&[1.0, 3.0, 2.0]), Some(1));
        }
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let params = SamplingParams {
            seed: 42,
            ..SamplingParams::default()
        };
        let logits = [1.0, 1.1, 0.9, 1.05, 0.95];
        let mut a = SamplerChain::from_params(&params);
        let mut b = SamplerChain::from_params(&params);
        let seq_a: Vec<_> = (0..20).map(|_| a.sample(&logits)).collect();
        let seq_b: Vec<_> = (0..20).map(|_| b.sample(&logits)).collect();
        assert_eq!(seq_a, seq_b);

        // A chain rebuilt from the same params starts the sequence over.
        let mut fresh = SamplerChain::from_params(&params);
        let replay: Vec<_> = (0..20).map(|_| fresh.sample(&logits)).collect();
        assert_eq!(replay, seq_a);
    }
}
