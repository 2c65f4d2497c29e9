use thiserror::Error;

/// Common error types shared across the gateway crates
#[derive(Error, Debug)]
pub enum CommonError {
    /// Address parsing errors
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Address validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("expected 40 hex digits, got {0}")]
    InvalidLength(usize),

    #[error("not a hex string: {0}")]
    InvalidHex(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CommonError>;

impl From<config::ConfigError> for CommonError {
    fn from(err: config::ConfigError) -> Self {
        CommonError::Config(format!("Configuration error: {}", err))
    }
}
