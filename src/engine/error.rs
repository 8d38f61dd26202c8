use ulid::Ulid;

use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// `field` is the caller-facing name of the offending input.
    Validation {
        field: &'static str,
        reason: String,
    },
    NotFound(Ulid),
    LimitExceeded(&'static str),
    Store(StoreError),
}

impl EngineError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}
