pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod qwen2;
pub mod shard;

pub use config::{ModelConfig, ModelMetadata, DEFAULT_VOCAB_SIZE, MAX_SEQ_LEN};
pub use engine::{Engine, EngineError, EngineFactory, EngineHandle};
pub use error::{ModelError, Result};
pub use loader::{load_weights, LoadReport, WeightLoader};
pub use qwen2::{CpuEngineFactory, Qwen2Engine};
