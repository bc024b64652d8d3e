//! Error taxonomy shared by every engine component.

use thiserror::Error;

/// Engine-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad or missing required input. Never auto-corrected.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced immersion, template or profile does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A collaborator call failed; callers isolate these per unit of work.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Missing or unusable configuration (e.g. SMTP credentials).
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the failure may be isolated to a single item or recipient.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientIo(_) | EngineError::Io(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}
