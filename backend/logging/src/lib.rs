//! Structured logging setup for conflux applications.
//!
//! The conflux crates only emit `tracing` events; installing a subscriber is
//! left to the application, usually through [`init_logger`].

pub mod logger;

pub use logger::{init_logger, init_with, LogOptions};
