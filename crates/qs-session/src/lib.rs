//! `qs-session` - The inference session for qwen-session.
//!
//! A [`Session`] owns one engine, walks it through configuration, weight
//! loading and preparation, and then drives single-step [`Session::forward`]
//! calls or a full prefill/decode [`Session::generate`] loop.

pub mod error;
pub mod params;
pub mod session;

pub use error::{GenerateError, Result, SessionError};
pub use params::{ExpectedFirstToken, FirstTokenPolicy, GenerateParams, DEFAULT_MAX_NEW_TOKENS};
pub use qs_sampler::SamplingParams;
pub use session::{Session, SessionState, CONFIG_FILE};
