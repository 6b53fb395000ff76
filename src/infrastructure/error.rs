use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("authentication required: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("server error: http {code}; {message}")]
    Server { code: u16, message: String },
    #[error("invalid session data: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unknown(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("credential store error: {0}")]
    Credential(String),
}

impl InfraError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
