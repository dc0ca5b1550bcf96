use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid model metadata: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error("missing config field: {0}")]
    ConfigMissingField(String),
    #[error("invalid value for config field '{field}': {reason}")]
    ConfigInvalidValue { field: String, reason: String },
    #[error("weight file {}: {reason}", .path.display())]
    WeightFileError { path: PathBuf, reason: String },
    #[error("duplicate weight '{name}': already registered from {}, found again in {}", .first.display(), .second.display())]
    DuplicateWeightName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("engine rejected weight '{name}': {source}")]
    EngineRejectedWeight {
        name: String,
        #[source]
        source: EngineError,
    },
    #[error("engine creation failed: {0}")]
    EngineCreateFailed(#[source] EngineError),
    #[error("tensor error: {0}")]
    Tensor(#[from] qs_tensor::TensorError),
}

impl ModelError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ModelError::ConfigInvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn weight_file(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ModelError::WeightFileError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
