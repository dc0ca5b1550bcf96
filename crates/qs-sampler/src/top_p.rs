use crate::sampler::{sort_descending, Sampler, TokenLogit};

/// Nucleus sampling: keeps the smallest set of tokens whose cumulative
/// probability exceeds the threshold `p`.
pub struct TopPSampler {
    p: f32,
}

impl TopPSampler {
    pub fn new(p: f32) -> Self {
        Self { p }
    }
}

impl Sampler for TopPSampler {
    fn name(&self) -> &str {
        "top_p"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() {
            return;
        }
        sort_descending(logits);

        let max_logit = logits[0].logit;
        let exps: Vec<f32> = logits.iter().map(|t| (t.logit - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();

        // Always keep at least one token.
        let mut cumulative = 0.0f32;
        let mut cutoff = logits.len();
        for (i, e) in exps.iter().enumerate() {
            cumulative += e / sum;
            if cumulative > self.p {
                cutoff = i + 1;
                break;
            }
        }
        logits.truncate(cutoff.max(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logits(values: &[f32]) -> Vec<TokenLogit> {
        values
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenLogit { token_id: i as u32, logit })
            .collect()
    }

    #[test]
    fn test_nucleus_cut() {
        // probs ~ [0.665, 0.245, 0.090]
        let mut l = logits(&[2.0, 1.0, 0.0]);
        TopPSampler::new(0.8).apply(&mut l);
        let ids: Vec<u32> = l.iter().map(|t| t.token_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_tiny_p_keeps_one() {
        let mut l = logits(&[0.0, 0.0, 0.0]);
        TopPSampler::new(0.0).apply(&mut l);
        assert_eq!(l.len(), 1);
    }
}
