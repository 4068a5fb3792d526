//! Shared error types

use thiserror::Error;

/// Rule violations detected before anything is written
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid numbers: {0}")]
    InvalidNumbers(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("validation failed: {0}")]
    Validation(String),
}
