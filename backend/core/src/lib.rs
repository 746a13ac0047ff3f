//! `conflux-core` — types shared by every conflux crate.
//!
//! Provides:
//! - The tagged [`ConfigError`] taxonomy with source attribution
//! - Plugin-type and instance naming rules
//! - A cancelation [`Context`] for lifecycle calls
//! - Duration literal parsing

pub mod context;
pub mod duration;
pub mod error;
pub mod naming;

pub use context::{CancelHandle, Context};
pub use duration::{format_duration, parse_duration};
pub use error::{BoxError, ConfigError, ErrorKind, Result};
