//! # tagspend-core
//!
//! Shared infrastructure for the tagspend workspace.
//!
//! - [`CoreError`] - errors for filesystem and logging setup
//! - [`logging`] - tracing subscriber setup and default paths

pub mod error;
pub mod logging;

pub use error::{CoreError, Result};
pub use logging::{LogGuard, init_logging};
