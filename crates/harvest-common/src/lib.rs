//! Harvest Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the harvest workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the shared error type and result alias
//! - **Cipher**: the session token cipher embedded in outbound request cookies
//! - **Timestamps**: the fixed-width `YYYYMMDDHHMMSS` watermark format
//! - **Logging**: tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use harvest_common::cipher::TokenCipher;
//! use harvest_common::Result;
//!
//! fn issue(secret: &str, huid: &str) -> Result<String> {
//!     let cipher = TokenCipher::new(secret)?;
//!     let pairs = vec![("huid".to_string(), huid.to_string())];
//!     Ok(cipher.encrypt(&pairs)?)
//! }
//! ```

pub mod cipher;
pub mod error;
pub mod logging;
pub mod timestamp;

// Re-export commonly used types
pub use error::{HarvestError, Result};
pub use timestamp::Watermark;
