use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    #[error("Range too large: {days} days exceeds the {max_days}-day limit")]
    RangeTooLarge { days: i64, max_days: i64 },

    #[error("Invalid group_by: {0}")]
    InvalidGroupBy(String),

    #[error("Invalid timeframe shortcut: {0}")]
    InvalidShortcut(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Row-store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Row-store query error: {0}")]
    StoreQueryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

/// Machine-readable failure category, stable across message wording changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRange,
    RangeTooLarge,
    InvalidGroupBy,
    InvalidShortcut,
    InvalidRequest,
    StoreUnavailable,
    StoreQueryError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRange => "invalid_range",
            ErrorKind::RangeTooLarge => "range_too_large",
            ErrorKind::InvalidGroupBy => "invalid_group_by",
            ErrorKind::InvalidShortcut => "invalid_shortcut",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::StoreQueryError => "store_query_error",
            ErrorKind::Internal => "internal",
        }
    }

    /// Transport status a caller should map this kind to.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidRange
            | ErrorKind::RangeTooLarge
            | ErrorKind::InvalidGroupBy
            | ErrorKind::InvalidShortcut
            | ErrorKind::InvalidRequest => 400,
            ErrorKind::StoreUnavailable => 503,
            ErrorKind::StoreQueryError | ErrorKind::Internal => 500,
        }
    }

    /// Only transient infrastructure failures are worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::StoreUnavailable)
    }

    pub fn is_validation(&self) -> bool {
        self.status_code() == 400
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidRange { .. } => ErrorKind::InvalidRange,
            EngineError::RangeTooLarge { .. } => ErrorKind::RangeTooLarge,
            EngineError::InvalidGroupBy(_) => ErrorKind::InvalidGroupBy,
            EngineError::InvalidShortcut(_) => ErrorKind::InvalidShortcut,
            EngineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            EngineError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            EngineError::StoreQueryError(_) => ErrorKind::StoreQueryError,
            EngineError::ConfigError(_) | EngineError::IoError { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        tracing::error!("Mapping StoreError to EngineError: {:?}", err);
        match err {
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
            StoreError::Timeout(limit) => {
                EngineError::StoreUnavailable(format!("query timed out after {} ms", limit.as_millis()))
            }
            StoreError::Query(msg) => EngineError::StoreQueryError(msg),
        }
    }
}
