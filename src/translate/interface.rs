use std::path::PathBuf;

use async_trait::async_trait;

/// A loaded English→X translation model.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text`, returning decoded candidates best-first.
    async fn translate(&self, text: &str) -> Result<Vec<String>, TranslateError>;
}

/// Failures while running a request through a model.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("inference failed")]
    Inference(#[from] ort::Error),

    #[error("unexpected model output: {0}")]
    Output(String),

    #[error("detokenization failed: {0}")]
    Decode(String),

    #[error("model produced no candidates")]
    EmptyOutput,

    #[error("inference worker failed")]
    Worker(#[from] tokio::task::JoinError),

    #[error("inference session lock poisoned")]
    Poisoned,
}

/// Failures while loading a model directory at startup.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("model file not found: {0}")]
    MissingFile(PathBuf),

    #[error("failed to load tokenizer {path}: {message}")]
    Tokenizer { path: PathBuf, message: String },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    ModelConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid generation settings in {path}: {message}")]
    Generation { path: PathBuf, message: String },

    #[error("failed to create inference session for {path}: {message}")]
    Session { path: PathBuf, message: String },
}
