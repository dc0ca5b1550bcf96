use qs_model::{EngineError, ModelError};
use thiserror::Error;

use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("session is {state}, operation requires {required}")]
    SessionNotReady {
        state: SessionState,
        required: SessionState,
    },
    #[error("forward called at position {got}, expected {expected}")]
    PositionContractViolation { expected: usize, got: usize },
    #[error("position {position} exceeds the context window of {max_seq_len} tokens")]
    ContextExhausted { position: usize, max_seq_len: usize },
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// A failed `generate` call, with whatever was produced before the failure.
#[derive(Error, Debug)]
#[error("generation stopped after {} tokens: {source}", .produced.len())]
pub struct GenerateError {
    pub produced: Vec<u32>,
    #[source]
    pub source: SessionError,
}

pub type Result<T> = std::result::Result<T, SessionError>;
