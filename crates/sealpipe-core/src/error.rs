use thiserror::Error;

pub type SealResult<T> = Result<T, SealError>;

#[derive(Debug, Error)]
pub enum SealError {
    /// Empty or malformed key material, or an argument the pipeline cannot use
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Compressed data is truncated or garbled
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    /// Envelope failed verification: tampered, truncated, or wrong key
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SealError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptStream(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailure(msg.into())
    }

    /// Short machine-friendly name of the error kind, used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::CorruptStream(_) => "corrupt_stream",
            Self::AuthenticationFailure(_) => "authentication_failure",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}
