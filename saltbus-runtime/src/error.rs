use saltbus_core::SaltError;
use saltbus_core::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Salt(#[from] SaltError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("worker already started")]
    AlreadyStarted,

    #[error("default instance already initialized")]
    AlreadyInitialized,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
