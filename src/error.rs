use structure_plan::PlanError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("connection refused: {reason}")]
    ConnectionRefused { reason: String },

    #[error("timeout waiting for {operation}")]
    TimeoutWaiting { operation: &'static str },

    #[error("target rejected {command}: {reason}")]
    Rejected { command: String, reason: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("disconnected: {reason}")]
    Disconnected { reason: String },

    #[error("plan hash mismatch: build recorded {recorded}, plan is {actual}")]
    PlanMismatch { recorded: String, actual: String },

    #[error("build {build_id} was started from {expected:?}, not {actual:?}")]
    SceneMismatch {
        build_id: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("build {0} not found")]
    BuildNotFound(String),

    #[error("build {build_id} is {status} and cannot be resumed")]
    NotResumable { build_id: String, status: &'static str },

    #[error("no active build")]
    NoActiveBuild,

    #[error("state record corrupt: {0}")]
    CorruptState(String),

    #[error("compile task failed: {0}")]
    Task(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialize(e.to_string())
    }
}

impl Error {
    /// The link to the target is gone. Retrying the same cell cannot help;
    /// the build has to stop and resume from its last checkpoint.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Error::Disconnected { .. } | Error::ConnectionRefused { .. } | Error::TimeoutWaiting { .. } | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_classification() {
        assert!(Error::Disconnected { reason: "eof".into() }.is_connection_loss());
        assert!(Error::TimeoutWaiting { operation: "set_block" }.is_connection_loss());
        assert!(Error::Io("broken pipe".into()).is_connection_loss());
        assert!(!Error::Rejected { command: "set_block".into(), reason: "protected".into() }.is_connection_loss());
        assert!(!Error::InvalidResponse("bad json".into()).is_connection_loss());
    }

    #[test]
    fn test_serde_errors_are_serialization_errors() {
        let err: Error = serde_json::from_str::<u32>("not a number").unwrap_err().into();
        assert!(matches!(err, Error::Serialize(_)));
    }
}
