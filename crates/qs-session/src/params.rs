use std::fmt;
use std::sync::Arc;

use qs_sampler::SamplingParams;

/// Decode budget when the caller does not set one.
pub const DEFAULT_MAX_NEW_TOKENS: usize = 200;

/// Decides what the first decoded token becomes.
///
/// Applied to the engine's first decode output only, before the stop-token
/// check. The returned token is both emitted and fed back as the next input.
pub trait FirstTokenPolicy: Send + Sync + fmt::Debug {
    fn align(&self, produced: u32) -> u32;
}

/// Forces the first decoded token to a fixed id, e.g. a model family's
/// reasoning preamble marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedFirstToken(pub u32);

impl FirstTokenPolicy for ExpectedFirstToken {
    fn align(&self, _produced: u32) -> u32 {
        self.0
    }
}

/// Arguments of [`Session::generate`](crate::Session::generate).
#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub max_new_tokens: usize,
    /// Token that ends decoding; it is not included in the output.
    pub stop_token_id: Option<u32>,
    pub first_token: Option<Arc<dyn FirstTokenPolicy>>,
    /// `None` takes the engine's top choice at every step.
    pub sampling: Option<SamplingParams>,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            stop_token_id: None,
            first_token: None,
            sampling: None,
        }
    }
}

impl GenerateParams {
    pub fn new(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            ..Default::default()
        }
    }

    pub fn with_stop_token(mut self, token: u32) -> Self {
        self.stop_token_id = Some(token);
        self
    }

    pub fn with_first_token(mut self, policy: impl FirstTokenPolicy + 'static) -> Self {
        self.first_token = Some(Arc::new(policy));
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = Some(sampling);
        self
    }
}
