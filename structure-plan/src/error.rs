#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("invalid scene at {path}: {reason}")]
    InvalidScene { path: String, reason: String },

    #[error("duplicate component id: {0}")]
    DuplicateComponent(String),

    #[error("invalid placement options: {0}")]
    InvalidOptions(String),

    #[error("unknown checkpoint: {0}")]
    UnknownCheckpoint(String),

    #[error("serialization failed: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for PlanError {
    fn from(e: serde_json::Error) -> Self {
        PlanError::Serialize(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlanError>;
