use thiserror::Error;

/// Common error types for the dispatch system
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// File system related errors
    #[error("{0}")]
    FileSystem(String),

    /// Configuration related errors
    #[error("{0}")]
    Configuration(String),

    /// Validation errors
    #[error("{0}")]
    Validation(String),

    /// Send/probe failures on the message substrate
    #[error("{0}")]
    Transport(String),

    /// A participant broke the message protocol
    #[error("{0}")]
    Protocol(String),

    /// Startup order-count rendezvous did not complete
    #[error("{0}")]
    Rendezvous(String),

    /// Serialization/deserialization errors
    #[error("{0}")]
    Serialization(String),

    /// Spawn errors
    #[error("{0}")]
    Spawn(String),

    /// Generic errors with context
    #[error("{0}")]
    Generic(String)
}

/// Convert from anyhow::Error
impl From<anyhow::Error> for DispatchError {
    fn from(err: anyhow::Error) -> Self {
        DispatchError::Generic(format!("{:#}", err))
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::FileSystem(err.to_string())
    }
}

/// Convert from serde_yaml::Error
impl From<serde_yaml::Error> for DispatchError {
    fn from(err: serde_yaml::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

/// Convert from serde_json::Error
impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

/// Convert from ractor::SpawnErr
impl From<ractor::SpawnErr> for DispatchError {
    fn from(err: ractor::SpawnErr) -> Self {
        DispatchError::Spawn(err.to_string())
    }
}
