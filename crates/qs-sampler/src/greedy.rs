use crate::sampler::{sort_descending, Sampler, TokenLogit};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Greedy sampler: selects the single token with the highest logit.
///
/// Ties keep the lowest token id, since the sort is stable.
pub struct GreedySampler;

impl GreedySampler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GreedySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for GreedySampler {
    fn name(&self) -> &str {
        "greedy"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() {
            return;
        }
        sort_descending(logits);
        logits.truncate(1);
    }
}

/// Distribution-based sampler: converts logits to probabilities via softmax,
/// then samples from the resulting distribution.
///
/// The RNG is seeded once and advances across calls, so a fresh sampler with
/// the same seed replays the same selections.
pub struct DistSampler {
    seed: u64,
    rng: StdRng,
}

impl DistSampler {
    /// Create a new distribution sampler with the given seed for reproducibility.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Sampler for DistSampler {
    fn name(&self) -> &str {
        "dist"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() {
            return;
        }

        let max_logit = logits
            .iter()
            .map(|t| t.logit)
            .fold(f32::NEG_INFINITY, f32::max);

        let exps: Vec<f32> = logits.iter().map(|t| (t.logit - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();
        let probs: Vec<f32> = exps.iter().map(|e| e / sum).collect();

        let dist = match WeightedIndex::new(&probs) {
            Ok(d) => d,
            Err(_) => {
                // Degenerate weights (all NaN or zero): fall back to the best logit.
                sort_descending(logits);
                logits.truncate(1);
                return;
            }
        };

        let selected = logits[dist.sample(&mut self.rng)].clone();
        logits.clear();
        logits.push(selected);
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}
