use crate::config::ConfigError;
use crate::gemini::GeminiError;

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to establish session: {0}")]
    Session(#[from] GeminiError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
