//! # phoenix-error
//!
//! Unified error handling for the phoenix crates.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what went wrong (e.g., StageTimeout, ConfigInvalid)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Locate the cause with key-value context such as the stage
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use phoenix_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::StageTimeout, "stage exceeded 300s")
//!         .with_operation("pipeline::run")
//!         .with_stage("fixing")
//!         .with_context("timeout_secs", "300"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, phoenix_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using phoenix Error
pub type Result<T> = std::result::Result<T, Error>;
