use std::time::Duration;

use thiserror::Error;

use crate::trace::TraceError;

#[derive(Debug, Error)]
pub enum OtellyError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("duplicate {entity} {id}: {detail}")]
    Conflict {
        entity: &'static str,
        id: String,
        detail: String,
    },

    #[error("malformed trace: {0}")]
    Trace(#[from] TraceError),

    #[error("ingest error: {0}")]
    Ingest(String),

    #[error("publish abandoned after {0:?}: no subscriber took delivery")]
    PublishTimeout(Duration),

    #[error("bus closed: no subscribers left")]
    BusClosed,

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OtellyError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, OtellyError>;
