use loadsim_generator::GeneratorError;

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// Config, transport and io messages get the context prepended;
    /// other variants are returned unchanged.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::Transport(e) => EngineError::Transport(e.with_context(ctx)),
            EngineError::Io(e) => EngineError::Io(std::io::Error::new(e.kind(), format!("{ctx}: {e}"))),
            EngineError::Generator(e) if e.is_config() => EngineError::Config(format!("{ctx}: {e}")),
            other => other,
        }
    }
}
