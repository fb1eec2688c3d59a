use thiserror::Error;

use crate::pg::context::ContextError;

/// Result type for database access operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the access layer
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error - missing or malformed settings
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Database error - returned by the driver unchanged
    #[error("Database error: {0}")]
    DatabaseError(#[from] tokio_postgres::Error),

    /// Pool error - connection could not be acquired
    #[error("Pool error: {0}")]
    PoolError(#[from] deadpool_postgres::PoolError),

    /// Pool build error - pool could not be created from the configuration
    #[error("Pool build error: {0}")]
    BuildError(#[from] deadpool_postgres::BuildError),

    /// A single-row query matched nothing
    #[error("empty record")]
    EmptyRecord,

    /// The caller's context was cancelled
    #[error("context canceled")]
    Cancelled,

    /// The caller's context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The transaction was already committed or rolled back
    #[error("Transaction error: transaction already closed")]
    TransactionClosed,

    /// The pool was already closed
    #[error("Pool error: pool already closed")]
    PoolClosed,

    /// The notification channel was closed
    #[error("Notification channel closed")]
    ChannelClosed,

    /// A handler is already registered for this channel name
    #[error("Notification channel '{0}' is already open")]
    ChannelAlreadyOpen(String),

    /// The notification channel has no live connection
    #[error("Notification channel not connected")]
    NotConnected,

    /// An operation did not finish in time
    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl Error {
    /// True for the expected "query executed but found nothing" outcome.
    pub fn is_empty_record(&self) -> bool {
        matches!(self, Error::EmptyRecord)
    }

    /// True when the error came from the caller's context.
    pub fn is_context(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

impl From<ContextError> for Error {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Error::Cancelled,
            ContextError::DeadlineExceeded => Error::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_is_distinguished() {
        let err = Error::EmptyRecord;
        assert!(err.is_empty_record());
        assert_eq!(err.to_string(), "empty record");
        assert!(!Error::NotConnected.is_empty_record());
    }

    #[test]
    fn test_context_errors_convert() {
        let err: Error = ContextError::Cancelled.into();
        assert!(matches!(err, Error::Cancelled));
        assert!(err.is_context());

        let err: Error = ContextError::DeadlineExceeded.into();
        assert!(matches!(err, Error::DeadlineExceeded));
        assert!(err.to_string().contains("deadline"));
    }

    #[test]
    fn test_channel_already_open_message() {
        let err = Error::ChannelAlreadyOpen("orders".to_string());
        assert!(err.to_string().contains("orders"));
    }
}
