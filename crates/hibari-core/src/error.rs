use thiserror::Error;

use crate::service::ServiceError;

#[derive(Debug, Error)]
pub enum HibariError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),
}
