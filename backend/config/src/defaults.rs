//! Literal defaults for zero-valued config fields.
//!
//! A config type lists its defaulted fields through [`Defaults`]:
//!
//! ```ignore
//! impl Defaults for ServerConfig {
//!     fn apply_defaults(&mut self, d: &mut DefaultsWalker) -> Result<()> {
//!         d.field("host", &mut self.host, "0.0.0.0")?;
//!         d.field("timeout", &mut self.timeout, "30s")?;
//!         d.nested("tls", &mut self.tls)
//!     }
//! }
//! ```
//!
//! A field is filled only while it holds its zero value, so applying
//! defaults twice changes nothing the first pass did not.

use std::time::Duration;

use conflux_core::naming::join_path;
use conflux_core::{parse_duration, ConfigError, Result};

/// Values with a recognisable "unset" state.
pub trait IsZero {
    fn is_zero(&self) -> bool;
}

/// Field types that accept a default literal.
pub trait DefaultLiteral: IsZero + Sized {
    fn parse_literal(literal: &str) -> std::result::Result<Self, String>;
}

macro_rules! number_defaults {
    ($($ty:ty),+) => {$(
        impl IsZero for $ty {
            fn is_zero(&self) -> bool {
                *self == 0 as $ty
            }
        }

        impl DefaultLiteral for $ty {
            fn parse_literal(literal: &str) -> std::result::Result<Self, String> {
                literal.trim().parse::<$ty>().map_err(|e| e.to_string())
            }
        }
    )+};
}

number_defaults!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl IsZero for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl DefaultLiteral for String {
    fn parse_literal(literal: &str) -> std::result::Result<Self, String> {
        Ok(literal.to_string())
    }
}

impl IsZero for bool {
    fn is_zero(&self) -> bool {
        !*self
    }
}

impl DefaultLiteral for bool {
    fn parse_literal(literal: &str) -> std::result::Result<Self, String> {
        literal.trim().parse::<bool>().map_err(|e| e.to_string())
    }
}

impl IsZero for Duration {
    fn is_zero(&self) -> bool {
        *self == Duration::ZERO
    }
}

impl DefaultLiteral for Duration {
    fn parse_literal(literal: &str) -> std::result::Result<Self, String> {
        parse_duration(literal)
    }
}

impl<T> IsZero for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

/// Comma separated; items are trimmed and empty items dropped.
impl DefaultLiteral for Vec<String> {
    fn parse_literal(literal: &str) -> std::result::Result<Self, String> {
        Ok(literal
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect())
    }
}

/// `None` and `Some(zero)` both count as unset.
impl<T: IsZero> IsZero for Option<T> {
    fn is_zero(&self) -> bool {
        self.as_ref().map_or(true, IsZero::is_zero)
    }
}

impl<T: DefaultLiteral> DefaultLiteral for Option<T> {
    fn parse_literal(literal: &str) -> std::result::Result<Self, String> {
        T::parse_literal(literal).map(Some)
    }
}

/// A struct whose fields carry default literals.
pub trait Defaults {
    fn apply_defaults(&mut self, walker: &mut DefaultsWalker) -> Result<()>;
}

impl Defaults for () {
    fn apply_defaults(&mut self, _walker: &mut DefaultsWalker) -> Result<()> {
        Ok(())
    }
}

/// Tracks the dotted path while [`Defaults`] implementations recurse.
#[derive(Debug, Default)]
pub struct DefaultsWalker {
    prefix: String,
}

impl DefaultsWalker {
    /// Assign `literal` to `slot` when it is zero.
    pub fn field<V: DefaultLiteral>(&mut self, name: &str, slot: &mut V, literal: &str) -> Result<()> {
        if !slot.is_zero() {
            return Ok(());
        }
        let path = join_path(&self.prefix, name);
        *slot = V::parse_literal(literal).map_err(|e| {
            ConfigError::parse(
                path.clone(),
                format!("invalid default '{literal}' for field '{path}': {e}"),
            )
        })?;
        Ok(())
    }

    pub fn nested<S: Defaults>(&mut self, name: &str, value: &mut S) -> Result<()> {
        let path = join_path(&self.prefix, name);
        let parent = std::mem::replace(&mut self.prefix, path);
        let result = value.apply_defaults(self);
        self.prefix = parent;
        result
    }

    /// Allocates a default `S` when the field is `None`, then recurses.
    pub fn nested_opt<S: Defaults + Default>(&mut self, name: &str, value: &mut Option<S>) -> Result<()> {
        self.nested(name, value.get_or_insert_with(S::default))
    }
}

/// Fill zero-valued fields of `value` from its declared literals.
pub fn apply_defaults<T: Defaults>(value: &mut T) -> Result<()> {
    value.apply_defaults(&mut DefaultsWalker::default())
}
