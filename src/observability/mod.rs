//! # Observability
//!
//! Structured logging for the translation core.

pub mod logging;

pub use logging::init_logging;
