//! Two-stage validation of a composed config: declared field rules first,
//! then the type's own [`Validate`] hook.

use std::fmt::Display;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

use conflux_core::naming::join_path;
use conflux_core::{ConfigError, Result};

use crate::defaults::IsZero;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").unwrap());

/// A rule violation at a field path.
#[derive(Debug, Clone, Error)]
#[error("config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// All rule violations found in one pass, in field order.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    /// The first violation as a [`ConfigError`], mentioning how many more
    /// were found.
    pub fn into_result(self) -> Result<()> {
        let mut errors = self.errors.into_iter();
        let Some(first) = errors.next() else {
            return Ok(());
        };
        let rest = errors.len();
        let mut message = first.message.clone();
        if rest > 0 {
            message.push_str(&format!(" (and {rest} more validation errors)"));
        }
        Err(ConfigError::validation(first.path.clone(), message).with_cause(first))
    }
}

/// Field rules of a config struct.
///
/// ```ignore
/// impl ValidateFields for ServerConfig {
///     fn validate_fields(&self, v: &mut FieldValidator) {
///         v.check("host", &self.host).required();
///         v.check("port", &self.port).min(1).max(65535);
///         v.check("mode", &self.mode).one_of(&["dev", "prod"]);
///     }
/// }
/// ```
pub trait ValidateFields {
    fn validate_fields(&self, _v: &mut FieldValidator) {}
}

/// Whole-value check run after the field rules pass.
pub trait Validate {
    fn validate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl ValidateFields for () {}
impl Validate for () {}

pub trait HasLen {
    fn length(&self) -> usize;
}

impl HasLen for String {
    fn length(&self) -> usize {
        self.chars().count()
    }
}

impl<T> HasLen for Vec<T> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<K, V, S> HasLen for std::collections::HashMap<K, V, S> {
    fn length(&self) -> usize {
        self.len()
    }
}

#[derive(Debug, Default)]
pub struct FieldValidator {
    prefix: String,
    report: ValidationReport,
}

impl FieldValidator {
    pub fn check<'a, V>(&'a mut self, name: &str, value: &'a V) -> FieldCheck<'a, V> {
        FieldCheck {
            path: join_path(&self.prefix, name),
            value,
            report: &mut self.report,
            skip: false,
        }
    }

    pub fn nested<S: ValidateFields>(&mut self, name: &str, value: &S) {
        let path = join_path(&self.prefix, name);
        let parent = std::mem::replace(&mut self.prefix, path);
        value.validate_fields(self);
        self.prefix = parent;
    }

    pub fn nested_opt<S: ValidateFields>(&mut self, name: &str, value: &Option<S>) {
        if let Some(value) = value {
            self.nested(name, value);
        }
    }

    pub fn into_report(self) -> ValidationReport {
        self.report
    }
}

/// Rules applied to one field. Rules chain; each violation is recorded.
pub struct FieldCheck<'a, V> {
    path: String,
    value: &'a V,
    report: &'a mut ValidationReport,
    skip: bool,
}

impl<'a, V> FieldCheck<'a, V> {
    fn fail(&mut self, message: String) {
        self.report.error(self.path.clone(), message);
    }

    /// Skip the remaining rules when the field is unset.
    pub fn optional(mut self) -> Self
    where
        V: IsZero,
    {
        self.skip = self.value.is_zero();
        self
    }

    pub fn required(mut self) -> Self
    where
        V: IsZero,
    {
        if !self.skip && self.value.is_zero() {
            let msg = format!("field '{}' is required", self.path);
            self.fail(msg);
        }
        self
    }

    pub fn min(mut self, bound: V) -> Self
    where
        V: PartialOrd + Display,
    {
        if !self.skip && *self.value < bound {
            let msg = format!("field '{}' must be >= {bound} (got {})", self.path, self.value);
            self.fail(msg);
        }
        self
    }

    pub fn max(mut self, bound: V) -> Self
    where
        V: PartialOrd + Display,
    {
        if !self.skip && *self.value > bound {
            let msg = format!("field '{}' must be <= {bound} (got {})", self.path, self.value);
            self.fail(msg);
        }
        self
    }

    pub fn len_min(mut self, n: usize) -> Self
    where
        V: HasLen,
    {
        let len = self.value.length();
        if !self.skip && len < n {
            let msg = format!("field '{}' must have at least {n} items (got {len})", self.path);
            self.fail(msg);
        }
        self
    }

    pub fn len_max(mut self, n: usize) -> Self
    where
        V: HasLen,
    {
        let len = self.value.length();
        if !self.skip && len > n {
            let msg = format!("field '{}' must have at most {n} items (got {len})", self.path);
            self.fail(msg);
        }
        self
    }

    pub fn one_of<O>(mut self, allowed: &[O]) -> Self
    where
        V: PartialEq<O> + Display,
        O: Display,
    {
        if !self.skip && !allowed.iter().any(|a| *self.value == *a) {
            let options: Vec<String> = allowed.iter().map(ToString::to_string).collect();
            let msg = format!(
                "field '{}' must be one of [{}] (got {})",
                self.path,
                options.join(", "),
                self.value
            );
            self.fail(msg);
        }
        self
    }

    pub fn email(mut self) -> Self
    where
        V: AsRef<str>,
    {
        if !self.skip && !EMAIL_PATTERN.is_match(self.value.as_ref()) {
            let msg = format!("field '{}' must be a valid email address", self.path);
            self.fail(msg);
        }
        self
    }
}

/// Run the field rules, then the [`Validate`] hook. The first failure is
/// returned as a `ValidationFailure`.
pub fn validate_config<T: ValidateFields + Validate>(config: &T) -> Result<()> {
    let mut validator = FieldValidator::default();
    config.validate_fields(&mut validator);
    let report = validator.into_report();
    for error in &report.errors {
        warn!(path = %error.path, message = %error.message, "Config validation error");
    }
    report.into_result()?;

    config.validate().map_err(|e| {
        ConfigError::validation("config", format!("validation hook failed: {e:#}")).with_anyhow(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::ErrorKind;

    #[derive(Default)]
    struct Tls {
        cert: String,
    }

    impl ValidateFields for Tls {
        fn validate_fields(&self, v: &mut FieldValidator) {
            v.check("cert", &self.cert).required();
        }
    }

    #[derive(Default)]
    struct Server {
        host: String,
        port: u16,
        mode: String,
        admin: String,
        peers: Vec<String>,
        tls: Option<Tls>,
    }

    impl ValidateFields for Server {
        fn validate_fields(&self, v: &mut FieldValidator) {
            v.check("host", &self.host).required();
            v.check("port", &self.port).min(1).max(9000);
            v.check("mode", &self.mode).one_of(&["dev", "prod"]);
            v.check("admin", &self.admin).optional().email();
            v.check("peers", &self.peers).len_max(2);
            v.nested_opt("tls", &self.tls);
        }
    }

    impl Validate for Server {
        fn validate(&self) -> anyhow::Result<()> {
            if self.mode == "prod" && self.tls.is_none() {
                anyhow::bail!("prod mode requires tls");
            }
            Ok(())
        }
    }

    fn valid() -> Server {
        Server {
            host: "localhost".into(),
            port: 8080,
            mode: "dev".into(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        validate_config(&valid()).unwrap();
    }

    #[test]
    fn first_field_error_carries_path() {
        let server = Server {
            port: 0,
            mode: "qa".into(),
            ..valid()
        };
        let err = validate_config(&server).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailure);
        assert_eq!(err.source_id, "port");
        assert!(err.message.contains("and 1 more"));
    }

    #[test]
    fn rules_cover_vocabulary() {
        let server = Server {
            host: String::new(),
            port: 9001,
            admin: "not-an-email".into(),
            peers: vec!["a".into(), "b".into(), "c".into()],
            tls: Some(Tls::default()),
            ..valid()
        };
        let mut v = FieldValidator::default();
        server.validate_fields(&mut v);
        let paths: Vec<_> = v.into_report().errors.into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["host", "port", "admin", "peers", "tls.cert"]);
    }

    #[test]
    fn hook_runs_after_fields() {
        let server = Server {
            mode: "prod".into(),
            ..valid()
        };
        let err = validate_config(&server).unwrap_err();
        assert!(err.message.contains("prod mode requires tls"));
    }
}
