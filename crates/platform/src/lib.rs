//! # Skiff Platform
//!
//! Core platform types for the skiff SFTP server workspace.
//!
//! This crate provides the unified error types (`SkiffError`, `SkiffResult`)
//! shared by every crate in the workspace.
//!
//! # Examples
//!
//! ```
//! use skiff_platform::{SkiffError, SkiffResult};
//!
//! fn example_function() -> SkiffResult<String> {
//!     Ok("Hello, skiff!".to_string())
//! }
//!
//! # fn main() -> SkiffResult<()> {
//! let result = example_function()?;
//! assert_eq!(result, "Hello, skiff!");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;

pub use error::{SkiffError, SkiffResult};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
