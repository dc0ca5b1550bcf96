use qs_model::{CpuEngineFactory, EngineFactory, Qwen2Engine};
use qs_session::Session;

/// Explicitly created runtime. Owns the engine factory that sessions are
/// opened through; there is no process-wide state besides logging.
pub struct QSRuntime {
    pub factory: CpuEngineFactory,
}

impl Default for QSRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl QSRuntime {
    pub fn new() -> Self {
        let factory = CpuEngineFactory::new();
        tracing::debug!(backend = factory.name(), "runtime created");
        Self { factory }
    }
}

/// Opaque session handle for C callers.
pub struct QSSession {
    pub session: Session<Qwen2Engine>,
}
