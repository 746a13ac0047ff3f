use std::fmt;

use thiserror::Error;

/// Boxed cause carried by a [`ConfigError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the conflux crates.
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// Category of a configuration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FileNotFound,
    ParseFailure,
    ValidationFailure,
    MergeFailure,
    WatchFailure,
    PluginFailure,
    UnsupportedSource,
    Canceled,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::FileNotFound => "file not found",
            ErrorKind::ParseFailure => "parse failure",
            ErrorKind::ValidationFailure => "validation failure",
            ErrorKind::MergeFailure => "merge failure",
            ErrorKind::WatchFailure => "watch failure",
            ErrorKind::PluginFailure => "plugin failure",
            ErrorKind::UnsupportedSource => "unsupported source",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Top-level error type for configuration loading, watching and plugins.
///
/// `source_id` names where the failure came from: a file path, a provider
/// name, a dotted field path for validation failures, or a plugin instance
/// key.
#[derive(Debug, Error)]
#[error("{kind} ({source_id}): {message}")]
pub struct ConfigError {
    pub kind: ErrorKind,
    pub source_id: String,
    pub message: String,
    #[source]
    pub cause: Option<BoxError>,
}

impl ConfigError {
    pub fn new(kind: ErrorKind, source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        let message = format!("config file '{path}' does not exist");
        Self::new(ErrorKind::FileNotFound, path, message)
    }

    pub fn parse(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseFailure, source_id, message)
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailure, field, message)
    }

    pub fn merge(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MergeFailure, source_id, message)
    }

    pub fn watch(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WatchFailure, source_id, message)
    }

    pub fn plugin(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PluginFailure, key, message)
    }

    pub fn unsupported_source(description: impl Into<String>) -> Self {
        let description = description.into();
        let message = format!("unsupported config source: {description}");
        Self::new(ErrorKind::UnsupportedSource, description, message)
    }

    pub fn canceled(source_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, source_id, "context canceled")
    }

    /// Attach an underlying cause, keeping it reachable through `source()`.
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attach an `anyhow` error as the cause.
    pub fn with_anyhow(self, cause: anyhow::Error) -> Self {
        self.with_cause(BoxError::from(cause))
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Prefix the message with additional context, preserving kind and cause.
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{context}: {}", self.message);
        self
    }
}
