//! Crate-wide error type.
//!
//! Store calls return `rusqlite::Result` and are lifted into [`Error::Store`]
//! at the service boundary. Parse failures and lookup misses are never errors.

use crate::ordering::ApplyError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Invalid(String),

    #[error("icon probe failed: {0}")]
    Probe(String),

    #[error("reorder aborted: {0}")]
    Reorder(#[from] ApplyError),

    #[error("settings error: {0}")]
    Settings(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound { entity, id: id.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Error::Invalid(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
