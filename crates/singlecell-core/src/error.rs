use thiserror::Error;

#[derive(Debug, Error)]
pub enum SingleCellError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session {0} is done")]
    SessionDone(String),

    #[error("Unknown interact: {0}")]
    UnknownInteract(String),

    #[error("Unknown control '{control}' in interact {interact_id}")]
    UnknownControl { interact_id: String, control: String },

    #[error("Invalid value for control '{control}': {reason}")]
    InvalidValue { control: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SingleCellError>;
