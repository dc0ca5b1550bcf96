use thiserror::Error;

use crate::config::ModelConfig;

/// Failures reported from across the engine boundary.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("unknown weight name: {0}")]
    UnknownWeight(String),
    #[error("weight '{name}' has {got} elements, expected {expected}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("weight not loaded: {0}")]
    MissingWeight(String),
    #[error("position {pos} is outside the context window of {max_seq_len}")]
    PositionOutOfRange { pos: usize, max_seq_len: usize },
    #[error("token id {token} exceeds vocab size {vocab_size}")]
    TokenOutOfRange { token: u32, vocab_size: usize },
    #[error("operation not supported by this engine: {0}")]
    Unsupported(&'static str),
    #[error("compute error: {0}")]
    Compute(#[from] qs_tensor::TensorError),
    #[error("{0}")]
    Other(String),
}

/// A live compute-engine instance for one model.
///
/// Engines hold the registered weights and whatever per-sequence state (KV
/// cache) they need. They are not safe for concurrent use; callers serialize
/// access through the owning session.
pub trait Engine: Send {
    /// Register one named weight. `data` is contiguous, row-major f32.
    ///
    /// The engine copies what it needs; the buffer is not retained.
    fn register_weight(&mut self, name: &str, data: &[f32]) -> Result<(), EngineError>;

    /// Called once after every weight has been registered.
    fn prepare(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Consume `token` at position `pos` and return the most likely next token.
    fn forward(&mut self, token: u32, pos: usize) -> Result<u32, EngineError>;

    /// Like [`Engine::forward`], but return logits over the whole vocabulary.
    fn forward_logits(&mut self, _token: u32, _pos: usize) -> Result<Vec<f32>, EngineError> {
        Err(EngineError::Unsupported("forward_logits"))
    }

    /// Discard per-sequence state so the next forward may start at position 0.
    fn reset(&mut self) {}
}

/// Explicitly constructed entry point that creates engines.
///
/// A factory stands in for "the loaded native library": the caller builds it
/// once and passes it wherever engines are created.
pub trait EngineFactory {
    type Engine: Engine;

    /// Returns a short name for logs (e.g. "cpu").
    fn name(&self) -> &str;

    /// Construct an engine for the given config.
    fn create(&self, config: &ModelConfig) -> Result<Self::Engine, EngineError>;
}

/// Sole owner of an engine instance.
///
/// The engine is destroyed exactly once: by [`EngineHandle::destroy`] or, if
/// that never ran, on drop. Destroying twice is a no-op.
pub struct EngineHandle<E: Engine> {
    engine: Option<E>,
}

impl<E: Engine> EngineHandle<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    /// Create an engine through `factory` and take ownership of it.
    pub fn create<F>(factory: &F, config: &ModelConfig) -> Result<Self, EngineError>
    where
        F: EngineFactory<Engine = E>,
    {
        let engine = factory.create(config)?;
        tracing::debug!(backend = factory.name(), "engine created");
        Ok(Self::new(engine))
    }

    /// Borrow the engine, or `None` once destroyed.
    pub fn get_mut(&mut self) -> Option<&mut E> {
        self.engine.as_mut()
    }

    pub fn get(&self) -> Option<&E> {
        self.engine.as_ref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.engine.is_none()
    }

    /// Release the engine. Safe to call any number of times.
    pub fn destroy(&mut self) {
        if let Some(engine) = self.engine.take() {
            drop(engine);
            tracing::debug!("engine destroyed");
        }
    }
}

impl<E: Engine> Drop for EngineHandle<E> {
    fn drop(&mut self) {
        self.destroy();
    }
}
