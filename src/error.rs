use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Illegal phase transition: {0}")]
    IllegalTransition(String),

    #[error("Insufficient entries: need at least {required}, found {found}")]
    InsufficientEntries { required: usize, found: usize },

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },

    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        EngineError::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        EngineError::Forbidden(msg.into())
    }

    /// True for caller errors that are safe to retry after fixing the input.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::InvalidAmount(_)
        )
    }
}
