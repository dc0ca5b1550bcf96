use std::fmt;
use std::path::Path;

use qs_model::{
    load_weights, Engine, EngineError, EngineFactory, EngineHandle, LoadReport, ModelConfig,
    ModelError, ModelMetadata,
};
use qs_sampler::SamplerChain;

use crate::error::{GenerateError, Result, SessionError};
use crate::params::GenerateParams;

/// Name of the metadata file inside a model directory.
pub const CONFIG_FILE: &str = "config.json";

/// Lifecycle of a [`Session`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Configured,
    WeightsLoaded,
    Ready,
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Configured => "configured",
            SessionState::WeightsLoaded => "weights-loaded",
            SessionState::Ready => "ready",
            SessionState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// A single-model generation session.
///
/// The session is the only owner of its engine. Any failure after the engine
/// exists (weight loading, preparation) releases it before the error is
/// returned, and the session ends up [`SessionState::Destroyed`].
///
/// Positions are strictly sequential: the `n`-th forward call since the last
/// reset must be made at position `n`.
pub struct Session<E: Engine> {
    state: SessionState,
    config: Option<ModelConfig>,
    handle: Option<EngineHandle<E>>,
    position: usize,
    load_report: Option<LoadReport>,
}

impl<E: Engine> Session<E> {
    pub fn new() -> Self {
        Session {
            state: SessionState::Uninitialized,
            config: None,
            handle: None,
            position: 0,
            load_report: None,
        }
    }

    /// Read `dir/config.json`, create the engine, load every shard in `dir`
    /// and prepare the engine.
    pub fn open<F>(dir: &Path, factory: &F) -> Result<Self>
    where
        F: EngineFactory<Engine = E>,
    {
        tracing::info!(dir = %dir.display(), backend = factory.name(), "opening session");
        let metadata = ModelMetadata::from_file(&dir.join(CONFIG_FILE))?;

        let mut session = Session::new();
        session.configure(&metadata, factory)?;
        session.load_weights(dir)?;
        session.prepare()?;
        Ok(session)
    }

    /// Translate `metadata` and create the engine: `Uninitialized -> Configured`.
    ///
    /// On failure nothing is allocated and the session stays uninitialized.
    pub fn configure<F>(&mut self, metadata: &ModelMetadata, factory: &F) -> Result<()>
    where
        F: EngineFactory<Engine = E>,
    {
        self.expect_state(SessionState::Uninitialized)?;
        let config = ModelConfig::from_metadata(metadata)?;
        let handle = EngineHandle::create(factory, &config).map_err(ModelError::EngineCreateFailed)?;

        tracing::debug!(?config, "session configured");
        self.config = Some(config);
        self.handle = Some(handle);
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Register every shard in `dir`: `Configured -> WeightsLoaded`.
    ///
    /// A failed load destroys the engine; tensors registered before the
    /// failure are not rolled back, so the engine cannot be reused.
    pub fn load_weights(&mut self, dir: &Path) -> Result<LoadReport> {
        self.expect_state(SessionState::Configured)?;
        let result = match self.engine_mut() {
            Ok(engine) => load_weights(dir, engine).map_err(SessionError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(report) => {
                self.load_report = Some(report.clone());
                self.state = SessionState::WeightsLoaded;
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "weight loading failed, releasing engine");
                self.destroy();
                Err(e)
            }
        }
    }

    /// Run the engine's post-load preparation: `WeightsLoaded -> Ready`.
    pub fn prepare(&mut self) -> Result<()> {
        self.expect_state(SessionState::WeightsLoaded)?;
        let result = match self.engine_mut() {
            Ok(engine) => engine.prepare().map_err(SessionError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "engine preparation failed, releasing engine");
            self.destroy();
            return Err(e);
        }
        self.state = SessionState::Ready;
        tracing::info!("session ready");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> Option<&ModelConfig> {
        self.config.as_ref()
    }

    /// Report of the completed weight load, if any.
    pub fn load_report(&self) -> Option<&LoadReport> {
        self.load_report.as_ref()
    }

    /// Position the next forward call must use.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn engine(&self) -> Option<&E> {
        self.handle.as_ref().and_then(EngineHandle::get)
    }

    /// One engine step at `position`, returning the engine's top choice.
    pub fn forward(&mut self, token: u32, position: usize) -> Result<u32> {
        self.step(token, position, None)
    }

    /// Rewind to position 0 and clear the engine's cached state.
    pub fn reset(&mut self) -> Result<()> {
        self.expect_state(SessionState::Ready)?;
        self.engine_mut()?.reset();
        self.position = 0;
        Ok(())
    }

    /// Generate a continuation of `prompt`.
    ///
    /// Every prompt token except the last is fed at positions
    /// `0..prompt.len() - 1` with results discarded. Decoding then starts from
    /// the last prompt token and runs until `max_new_tokens` tokens have been
    /// produced or the stop token comes up. The stop token is not returned.
    ///
    /// On failure the tokens produced so far travel with the error.
    pub fn generate(&mut self, prompt: &[u32], params: &GenerateParams) -> std::result::Result<Vec<u32>, GenerateError> {
        let mut produced = Vec::new();
        match self.run_generate(prompt, params, &mut produced) {
            Ok(()) => Ok(produced),
            Err(source) => Err(GenerateError { produced, source }),
        }
    }

    fn run_generate(&mut self, prompt: &[u32], params: &GenerateParams, out: &mut Vec<u32>) -> Result<()> {
        self.expect_state(SessionState::Ready)?;
        let (&last, prefix) = prompt.split_last().ok_or(SessionError::EmptyPrompt)?;
        self.reset()?;

        let mut sampler = params.sampling.as_ref().map(SamplerChain::from_params);

        for (pos, &token) in prefix.iter().enumerate() {
            self.step(token, pos, None)?;
        }
        tracing::debug!(prompt_len = prompt.len(), "prefill complete");

        let mut token = last;
        for step in 0..params.max_new_tokens {
            let mut next = self.step(token, self.position, sampler.as_mut())?;

            if step == 0 {
                if let Some(policy) = &params.first_token {
                    let aligned = policy.align(next);
                    if aligned != next {
                        tracing::debug!(produced = next, aligned, "first token overridden");
                        next = aligned;
                    }
                }
            }

            if params.stop_token_id == Some(next) {
                tracing::debug!(step, token = next, "stop token reached");
                break;
            }
            out.push(next);
            token = next;
        }

        tracing::debug!(produced = out.len(), position = self.position, "decode complete");
        Ok(())
    }

    /// Release the engine. Safe to call any number of times.
    pub fn destroy(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.destroy();
        }
        self.state = SessionState::Destroyed;
    }

    fn step(&mut self, token: u32, position: usize, sampler: Option<&mut SamplerChain>) -> Result<u32> {
        self.expect_state(SessionState::Ready)?;
        if position != self.position {
            return Err(SessionError::PositionContractViolation {
                expected: self.position,
                got: position,
            });
        }
        let max_seq_len = self.config.as_ref().map_or(0, |c| c.max_seq_len);
        if position >= max_seq_len {
            return Err(SessionError::ContextExhausted {
                position,
                max_seq_len,
            });
        }

        let engine = self.engine_mut()?;
        let next = match sampler {
            None => engine.forward(token, position)?,
            Some(chain) => {
                let logits = engine.forward_logits(token, position)?;
                chain
                    .sample(&logits)
                    .ok_or_else(|| EngineError::Other("engine returned no logits".to_string()))?
            }
        };
        self.position += 1;
        Ok(next)
    }

    fn expect_state(&self, required: SessionState) -> Result<()> {
        if self.state != required {
            return Err(SessionError::SessionNotReady {
                state: self.state,
                required,
            });
        }
        Ok(())
    }

    fn engine_mut(&mut self) -> Result<&mut E> {
        let state = self.state;
        self.handle
            .as_mut()
            .and_then(EngineHandle::get_mut)
            .ok_or(SessionError::SessionNotReady {
                state,
                required: SessionState::Ready,
            })
    }
}

impl<E: Engine> Default for Session<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ExpectedFirstToken;
    use qs_model::CpuEngineFactory;
    use qs_sampler::SamplingParams;
    use safetensors::tensor::TensorView;
    use safetensors::Dtype;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const VOCAB: usize = 32;

    /// Replays scripted outputs and records every forward call.
    struct ScriptedEngine {
        responses: VecDeque<u32>,
        fallback: u32,
        calls: Vec<(u32, usize)>,
        registered: Vec<String>,
        fail_at_call: Option<usize>,
        resets: usize,
        drops: Arc<AtomicUsize>,
    }

    impl ScriptedEngine {
        fn next_output(&mut self, token: u32, pos: usize) -> std::result::Result<u32, EngineError> {
            if self.fail_at_call == Some(self.calls.len()) {
                return Err(EngineError::Other("scripted failure".to_string()));
            }
            self.calls.push((token, pos));
            Ok(self.responses.pop_front().unwrap_or(self.fallback))
        }
    }

    impl Engine for ScriptedEngine {
        fn register_weight(&mut self, name: &str, _data: &[f32]) -> std::result::Result<(), EngineError> {
            if name == "rejected" {
                return Err(EngineError::UnknownWeight(name.to_string()));
            }
            self.registered.push(name.to_string());
            Ok(())
        }

        fn forward(&mut self, token: u32, pos: usize) -> std::result::Result<u32, EngineError> {
            self.next_output(token, pos)
        }

        fn forward_logits(&mut self, token: u32, pos: usize) -> std::result::Result<Vec<f32>, EngineError> {
            let next = self.next_output(token, pos)?;
            let mut logits = vec![0.0; VOCAB];
            logits[next as usize] = 50.0;
            Ok(logits)
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    impl Drop for ScriptedEngine {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct ScriptedFactory {
        responses: Vec<u32>,
        fallback: u32,
        fail_at_call: Option<usize>,
        fail_create: bool,
        drops: Arc<AtomicUsize>,
    }

    impl EngineFactory for ScriptedFactory {
        type Engine = ScriptedEngine;

        fn name(&self) -> &str {
            "scripted"
        }

        fn create(&self, _config: &ModelConfig) -> std::result::Result<ScriptedEngine, EngineError> {
            if self.fail_create {
                return Err(EngineError::InvalidConfig("refused".to_string()));
            }
            Ok(ScriptedEngine {
                responses: self.responses.iter().copied().collect(),
                fallback: self.fallback,
                calls: Vec::new(),
                registered: Vec::new(),
                fail_at_call: self.fail_at_call,
                resets: 0,
                drops: self.drops.clone(),
            })
        }
    }

    fn metadata() -> ModelMetadata {
        ModelMetadata::default()
            .with("hidden_size", 8)
            .with("intermediate_size", 16)
            .with("num_hidden_layers", 1)
            .with("num_attention_heads", 2)
            .with("num_key_value_heads", 1)
            .with("vocab_size", VOCAB as u64)
    }

    fn ready(factory: &ScriptedFactory) -> Session<ScriptedEngine> {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new();
        session.configure(&metadata(), factory).unwrap();
        session.load_weights(dir.path()).unwrap();
        session.prepare().unwrap();
        session
    }

    fn calls(session: &Session<ScriptedEngine>) -> Vec<(u32, usize)> {
        session.engine().unwrap().calls.clone()
    }

    #[test]
    fn test_staged_lifecycle() {
        let factory = ScriptedFactory::default();
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new();
        assert_eq!(session.state(), SessionState::Uninitialized);

        session.configure(&metadata(), &factory).unwrap();
        assert_eq!(session.state(), SessionState::Configured);
        assert_eq!(session.config().unwrap().max_seq_len, qs_model::MAX_SEQ_LEN);

        let report = session.load_weights(dir.path()).unwrap();
        assert_eq!(report, LoadReport::default());
        assert_eq!(session.state(), SessionState::WeightsLoaded);

        session.prepare().unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_out_of_order_steps() {
        let factory = ScriptedFactory::default();
        let dir = tempfile::tempdir().unwrap();
        let mut session: Session<ScriptedEngine> = Session::new();

        assert!(matches!(
            session.forward(1, 0),
            Err(SessionError::SessionNotReady {
                state: SessionState::Uninitialized,
                required: SessionState::Ready
            })
        ));
        assert!(matches!(
            session.load_weights(dir.path()),
            Err(SessionError::SessionNotReady { .. })
        ));

        session.configure(&metadata(), &factory).unwrap();
        assert!(matches!(session.prepare(), Err(SessionError::SessionNotReady { .. })));
        assert!(matches!(
            session.forward(1, 0),
            Err(SessionError::SessionNotReady {
                state: SessionState::Configured,
                ..
            })
        ));
        assert!(matches!(
            session.configure(&metadata(), &factory),
            Err(SessionError::SessionNotReady { .. })
        ));

        session.load_weights(dir.path()).unwrap();
        assert!(matches!(
            session.generate(&[1], &GenerateParams::new(1)).map_err(|e| e.source),
            Err(SessionError::SessionNotReady { .. })
        ));
    }

    #[test]
    fn test_configure_failures_leave_nothing_allocated() {
        let factory = ScriptedFactory {
            fail_create: true,
            ..Default::default()
        };
        let mut session: Session<ScriptedEngine> = Session::new();
        assert!(matches!(
            session.configure(&metadata(), &factory),
            Err(SessionError::Model(ModelError::EngineCreateFailed(_)))
        ));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.engine().is_none());

        let incomplete = ModelMetadata::default().with("hidden_size", 8);
        assert!(matches!(
            session.configure(&incomplete, &ScriptedFactory::default()),
            Err(SessionError::Model(ModelError::ConfigMissingField(_)))
        ));
    }

    #[test]
    fn test_failed_load_releases_engine() {
        let drops = Arc::new(AtomicUsize::new(0));
        let factory = ScriptedFactory {
            drops: drops.clone(),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        write_shard(
            &dir.path().join("model.safetensors"),
            &[("rejected", vec![1], vec![1.0])],
        );

        let mut session = Session::new();
        session.configure(&metadata(), &factory).unwrap();
        assert!(matches!(
            session.load_weights(dir.path()),
            Err(SessionError::Model(ModelError::EngineRejectedWeight { .. }))
        ));
        assert_eq!(session.state(), SessionState::Destroyed);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        session.destroy();
        drop(session);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let drops = Arc::new(AtomicUsize::new(0));
        let factory = ScriptedFactory {
            drops: drops.clone(),
            ..Default::default()
        };
        let mut session = ready(&factory);
        session.destroy();
        session.destroy();
        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(matches!(
            session.forward(0, 0),
            Err(SessionError::SessionNotReady { .. })
        ));
        drop(session);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_forward_position_contract() {
        let mut session = ready(&ScriptedFactory::default());
        session.forward(1, 0).unwrap();
        assert!(matches!(
            session.forward(1, 0),
            Err(SessionError::PositionContractViolation { expected: 1, got: 0 })
        ));
        assert!(matches!(
            session.forward(1, 5),
            Err(SessionError::PositionContractViolation { expected: 1, got: 5 })
        ));
        session.forward(1, 1).unwrap();

        session.reset().unwrap();
        assert_eq!(session.position(), 0);
        session.forward(1, 0).unwrap();
        assert_eq!(session.engine().unwrap().resets, 1);
    }

    #[test]
    fn test_prefill_and_decode_positions() {
        let factory = ScriptedFactory {
            fallback: 1,
            ..Default::default()
        };
        let mut session = ready(&factory);
        let prompt = [10, 11, 12, 13, 14];
        let out = session.generate(&prompt, &GenerateParams::new(3)).unwrap();
        assert_eq!(out.len(), 3);

        let positions: Vec<usize> = calls(&session).iter().map(|&(_, p)| p).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4, 5, 6]);
        let inputs: Vec<u32> = calls(&session).iter().map(|&(t, _)| t).collect();
        assert_eq!(&inputs[..5], &prompt);
    }

    #[test]
    fn test_stop_token_not_emitted() {
        let factory = ScriptedFactory {
            responses: vec![3, 7, 9],
            ..Default::default()
        };
        let mut session = ready(&factory);
        let params = GenerateParams::new(10).with_stop_token(7);
        assert_eq!(session.generate(&[1], &params).unwrap(), vec![3]);
        // 9 is never requested.
        assert_eq!(calls(&session).len(), 2);
    }

    #[test]
    fn test_max_new_tokens() {
        let factory = ScriptedFactory {
            fallback: 4,
            ..Default::default()
        };
        let mut session = ready(&factory);
        let params = GenerateParams::new(2).with_stop_token(7);
        assert_eq!(session.generate(&[1, 2], &params).unwrap(), vec![4, 4]);

        assert!(session.generate(&[1, 2], &GenerateParams::new(0)).unwrap().is_empty());
    }

    #[test]
    fn test_first_token_alignment() {
        let factory = ScriptedFactory {
            responses: vec![55, 60, 61],
            ..Default::default()
        };
        let mut session = ready(&factory);
        let params = GenerateParams::new(3).with_first_token(ExpectedFirstToken(100));
        let out = session.generate(&[1], &params).unwrap();
        assert_eq!(out, vec![100, 60, 61]);
        assert_eq!(calls(&session)[1], (100, 1));
    }

    #[test]
    fn test_alignment_applies_before_stop_check() {
        let factory = ScriptedFactory {
            responses: vec![7],
            fallback: 2,
            ..Default::default()
        };
        let mut session = ready(&factory);
        let params = GenerateParams::new(2)
            .with_stop_token(7)
            .with_first_token(ExpectedFirstToken(5));
        assert_eq!(session.generate(&[1], &params).unwrap(), vec![5, 2]);
    }

    #[test]
    fn test_generate_resets_between_calls() {
        let factory = ScriptedFactory {
            fallback: 3,
            ..Default::default()
        };
        let mut session = ready(&factory);
        session.generate(&[1, 2, 3], &GenerateParams::new(2)).unwrap();
        session.generate(&[1, 2, 3], &GenerateParams::new(2)).unwrap();
        let positions: Vec<usize> = calls(&session).iter().map(|&(_, p)| p).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 0, 1, 2, 3]);
        assert_eq!(session.engine().unwrap().resets, 2);
    }

    #[test]
    fn test_empty_prompt() {
        let mut session = ready(&ScriptedFactory::default());
        let err = session.generate(&[], &GenerateParams::default()).unwrap_err();
        assert!(matches!(err.source, SessionError::EmptyPrompt));
        assert!(err.produced.is_empty());
        assert!(calls(&session).is_empty());
    }

    #[test]
    fn test_failure_keeps_partial_output() {
        let factory = ScriptedFactory {
            responses: vec![0, 4, 5],
            fail_at_call: Some(3),
            ..Default::default()
        };
        let mut session = ready(&factory);
        // One prefill call, then decode outputs 4 and 5 before the failure.
        let err = session.generate(&[1, 2], &GenerateParams::new(10)).unwrap_err();
        assert_eq!(err.produced, vec![4, 5]);
        assert!(matches!(err.source, SessionError::Engine(EngineError::Other(_))));
    }

    #[test]
    fn test_context_exhausted() {
        let factory = ScriptedFactory {
            fallback: 1,
            ..Default::default()
        };
        let mut session = ready(&factory);
        let max = session.config().unwrap().max_seq_len;
        let err = session.generate(&[1, 2], &GenerateParams::new(max + 5)).unwrap_err();
        assert_eq!(err.produced.len(), max - 1);
        assert!(matches!(
            err.source,
            SessionError::ContextExhausted { position, max_seq_len } if position == max && max_seq_len == max
        ));
    }

    #[test]
    fn test_sampling_uses_logits() {
        let factory = ScriptedFactory {
            responses: vec![0, 9, 8, 7],
            ..Default::default()
        };
        let mut session = ready(&factory);
        let params = GenerateParams::new(3).with_sampling(SamplingParams {
            temperature: 0.8,
            top_k: Some(1),
            top_p: 0.9,
            seed: 1,
        });
        assert_eq!(session.generate(&[1, 2], &params).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_open_reads_config_and_weights() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            serde_json::to_string(&metadata().entries).unwrap(),
        )
        .unwrap();
        write_shard(&dir.path().join("model.safetensors"), &[("w", vec![2], vec![1.0, 2.0])]);

        let session = Session::open(dir.path(), &ScriptedFactory::default()).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.engine().unwrap().registered, vec!["w".to_string()]);
        assert_eq!(session.load_report().unwrap().tensors, 1);
    }

    #[test]
    fn test_open_without_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Session::open(dir.path(), &ScriptedFactory::default()),
            Err(SessionError::Model(ModelError::Io(_)))
        ));
    }

    // Checkpoint helpers.

    fn write_shard(path: &Path, tensors: &[(&str, Vec<usize>, Vec<f32>)]) {
        let bytes: Vec<Vec<u8>> = tensors
            .iter()
            .map(|(_, _, values)| values.iter().flat_map(|v| v.to_le_bytes()).collect())
            .collect();
        let views: Vec<(String, TensorView<'_>)> = tensors
            .iter()
            .zip(&bytes)
            .map(|((name, shape, _), data)| {
                (name.to_string(), TensorView::new(Dtype::F32, shape.clone(), data).unwrap())
            })
            .collect();
        std::fs::write(path, safetensors::serialize(views, &None).unwrap()).unwrap();
    }

    fn write_f16_shard(path: &Path, tensors: &[(String, Vec<usize>, Vec<f32>)]) {
        let bytes: Vec<Vec<u8>> = tensors
            .iter()
            .map(|(_, _, values)| {
                values
                    .iter()
                    .flat_map(|&v| half::f16::from_f32(v).to_le_bytes())
                    .collect()
            })
            .collect();
        let views: Vec<(String, TensorView<'_>)> = tensors
            .iter()
            .zip(&bytes)
            .map(|((name, shape, _), data)| {
                (name.clone(), TensorView::new(Dtype::F16, shape.clone(), data).unwrap())
            })
            .collect();
        std::fs::write(path, safetensors::serialize(views, &None).unwrap()).unwrap();
    }

    /// A tiny Qwen2 checkpoint split over two f16 shards, without `lm_head`.
    fn write_tiny_qwen2(dir: &Path) {
        let meta = ModelMetadata::default()
            .with("hidden_size", 8)
            .with("intermediate_size", 12)
            .with("num_hidden_layers", 2)
            .with("num_attention_heads", 2)
            .with("num_key_value_heads", 1)
            .with("vocab_size", 16)
            .with("rope_theta", 10000.0);
        std::fs::write(
            dir.join(CONFIG_FILE),
            serde_json::to_string(&meta.entries).unwrap(),
        )
        .unwrap();

        let config = ModelConfig::from_metadata(&meta).unwrap();
        let table: Vec<(String, Vec<usize>, Vec<f32>)> = qs_model::qwen2::parameter_table(&config)
            .into_iter()
            .filter(|(name, _)| name != "lm_head.weight")
            .enumerate()
            .map(|(i, (name, dims))| {
                let n: usize = dims.iter().product();
                let values = (0..n)
                    .map(|j| (((j + 3) * 37 + i * 101) % 97) as f32 / 97.0 - 0.5)
                    .collect();
                (name, dims, values)
            })
            .collect();
        let (a, b) = table.split_at(table.len() / 2);
        write_f16_shard(&dir.join("model-00001-of-00002.safetensors"), a);
        write_f16_shard(&dir.join("model-00002-of-00002.safetensors"), b);
    }

    #[test]
    fn test_end_to_end_qwen2() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_qwen2(dir.path());

        let factory = CpuEngineFactory::new();
        let mut session = Session::open(dir.path(), &factory).unwrap();
        assert!(session.engine().unwrap().tied_embeddings());
        assert_eq!(session.load_report().unwrap().shards, 2);

        let prompt = [1, 5, 9];
        let params = GenerateParams::new(6);
        let first = session.generate(&prompt, &params).unwrap();
        assert_eq!(first.len(), 6);
        assert!(first.iter().all(|&t| t < 16));

        // Same session, same prompt: identical continuation.
        assert_eq!(session.generate(&prompt, &params).unwrap(), first);

        // Manual forward loop reproduces generate.
        session.reset().unwrap();
        session.forward(1, 0).unwrap();
        session.forward(5, 1).unwrap();
        let mut token = 9;
        let mut manual = Vec::new();
        for pos in 2..8 {
            token = session.forward(token, pos).unwrap();
            manual.push(token);
        }
        assert_eq!(manual, first);
    }

    #[test]
    fn test_end_to_end_empty_checkpoint_fails_at_forward() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            serde_json::to_string(&metadata().entries).unwrap(),
        )
        .unwrap();

        let mut session = Session::open(dir.path(), &CpuEngineFactory::new()).unwrap();
        assert_eq!(session.load_report().unwrap().tensors, 0);
        assert!(matches!(
            session.forward(1, 0),
            Err(SessionError::Engine(EngineError::MissingWeight(_)))
        ));
    }
}
