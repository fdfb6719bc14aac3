use thiserror::Error;

#[derive(Error, Debug)]
pub enum CuratorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] curator_config::ConfigError),

    #[error("invalid media file: {0}")]
    InvalidMedia(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("circuit breaker open: {0}")]
    BreakerOpen(String),

    #[error("service not configured: {0}")]
    Unconfigured(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CuratorError {
    /// Whether the error class is worth retrying with backoff.
    ///
    /// Network glitches, rate limits and 5xx responses are transient; auth
    /// failures, parse failures and missing entities are not. Local IO gets
    /// its own bounded retry inside the stability and hashing stages, so it
    /// is deliberately not transient here.
    pub fn is_transient(&self) -> bool {
        match self {
            CuratorError::Http(err) => {
                if err.is_timeout() || err.is_connect() {
                    return true;
                }
                match err.status() {
                    Some(status) => status.is_server_error() || status.as_u16() == 429,
                    None => true,
                }
            }
            CuratorError::Database(_) | CuratorError::RateLimited(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CuratorError>;
