//! Error types shared across the harvest workspace

use thiserror::Error;

use crate::cipher::CipherError;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Main error type for shared harvest functionality
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Invalid timestamp '{value}': expected {expected}")]
    InvalidTimestamp { value: String, expected: &'static str },

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),
}
