//! Logging setup shared by binaries and tests.

/// Subscriber configuration (format, filters).
pub mod logging;

pub use logging::{LogFormat, init, try_init};
