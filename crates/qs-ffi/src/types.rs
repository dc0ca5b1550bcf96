use qs_session::{ExpectedFirstToken, GenerateParams, SamplingParams};

/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QSStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorModelLoad = 2,
    ErrorGenerate = 3,
    ErrorNotReady = 4,
    ErrorInternal = 5,
}

/// Parameters controlling generation.
///
/// Negative `stop_token_id` / `expected_first_token` disable the feature.
/// Sampling is used only when `sample` is true; otherwise every step takes
/// the engine's top choice.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct QSGenerateParams {
    pub max_new_tokens: u32,
    pub stop_token_id: i64,
    pub expected_first_token: i64,
    pub sample: bool,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub seed: u64,
}

impl Default for QSGenerateParams {
    fn default() -> Self {
        let sampling = SamplingParams::default();
        Self {
            max_new_tokens: qs_session::DEFAULT_MAX_NEW_TOKENS as u32,
            stop_token_id: -1,
            expected_first_token: -1,
            sample: false,
            temperature: sampling.temperature,
            top_k: 0,
            top_p: sampling.top_p,
            seed: sampling.seed,
        }
    }
}

fn token_id(raw: i64) -> Option<u32> {
    u32::try_from(raw).ok()
}

impl QSGenerateParams {
    /// Convert to session parameters, capping the budget at `capacity`.
    pub fn to_generate_params(&self, capacity: usize) -> GenerateParams {
        let mut params = GenerateParams::new((self.max_new_tokens as usize).min(capacity));
        params.stop_token_id = token_id(self.stop_token_id);
        if let Some(expected) = token_id(self.expected_first_token) {
            params = params.with_first_token(ExpectedFirstToken(expected));
        }
        if self.sample {
            params = params.with_sampling(SamplingParams {
                temperature: self.temperature,
                top_k: (self.top_k > 0).then_some(self.top_k as usize),
                top_p: self.top_p,
                seed: self.seed,
            });
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qs_session::FirstTokenPolicy;

    #[test]
    fn test_default_is_greedy_without_stop() {
        let params = QSGenerateParams::default().to_generate_params(usize::MAX);
        assert_eq!(params.max_new_tokens, 200);
        assert!(params.stop_token_id.is_none());
        assert!(params.first_token.is_none());
        assert!(params.sampling.is_none());
    }

    #[test]
    fn test_conversion() {
        let raw = QSGenerateParams {
            max_new_tokens: 50,
            stop_token_id: 151_643,
            expected_first_token: 151_646,
            sample: true,
            top_k: 20,
            ..Default::default()
        };
        let params = raw.to_generate_params(8);
        assert_eq!(params.max_new_tokens, 8);
        assert_eq!(params.stop_token_id, Some(151_643));
        assert_eq!(params.first_token.as_ref().map(|p| p.align(0)), Some(151_646));
        assert_eq!(params.sampling.as_ref().and_then(|s| s.top_k), Some(20));
    }
}
