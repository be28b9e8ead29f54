//! Storage Error Types
//!
//! Errors raised by the transactional store and the repositories.
//! Argument errors live with the parser (`commands::parser::ParseError`)
//! because they are detected before any storage call is made.

use thiserror::Error;

/// Result type used by the storage layer.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing keys.
#[derive(Debug, Error)]
pub enum Error {
    /// The key does not exist (only raised where absence is not a plain
    /// read, e.g. the source of a rename).
    #[error("no such key")]
    NotFound,

    /// The key exists but holds a value of a different type.
    #[error("key type mismatch")]
    KeyType,

    /// The value is not one of the accepted scalar shapes.
    #[error("invalid value type")]
    ValueType,

    /// The stored value cannot be read as an integer.
    #[error("value is not an integer or out of range")]
    NotInteger,

    /// The stored value cannot be read as a float.
    #[error("value is not a valid float")]
    NotFloat,

    /// Integer arithmetic left the i64 range.
    #[error("increment or decrement would overflow")]
    Overflow,

    /// The transaction's context was cancelled.
    #[error("transaction cancelled")]
    Cancelled,

    /// The transaction's deadline elapsed before it finished.
    #[error("transaction deadline exceeded")]
    DeadlineExceeded,

    /// A transaction handle was kept alive past its closure.
    #[error("transaction handle still in use")]
    TxInUse,

    /// Any other SQL failure, propagated unchanged.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Returns true if the error describes the shape of stored data rather
    /// than a storage failure.
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            Error::KeyType | Error::ValueType | Error::NotInteger | Error::NotFloat
        )
    }
}
