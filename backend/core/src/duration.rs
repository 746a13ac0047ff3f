//! Human duration literals such as `30s`, `1h30m` or `250ms`.
//!
//! Used by the defaults engine for `Duration` fields and by
//! [`serde_str`] so configuration files can spell durations the same way.

use std::time::Duration;

const UNITS: &[(&str, f64)] = &[
    ("ns", 1e-9),
    ("us", 1e-6),
    ("µs", 1e-6),
    ("ms", 1e-3),
    ("s", 1.0),
    ("m", 60.0),
    ("h", 3600.0),
    ("d", 86400.0),
];

/// Parse a duration literal made of one or more `<number><unit>` parts.
///
/// A bare `0` is accepted; any other number needs a unit.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration '{input}'"))?;
        if num_end == 0 {
            return Err(format!("invalid duration '{input}'"));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| format!("invalid number in duration '{input}'"))?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        let factor = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, factor)| *factor)
            .ok_or_else(|| format!("unknown unit '{unit}' in duration '{input}'"))?;
        total += value * factor;
        rest = &rest[unit_end..];
    }

    Duration::try_from_secs_f64(total).map_err(|_| format!("duration '{input}' out of range"))
}

/// Render a duration in the largest exact unit (`90s` -> `1m30s`).
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    let nanos = d.subsec_nanos();
    if nanos != 0 {
        if nanos % 1_000_000 == 0 && d.as_secs() == 0 {
            return format!("{}ms", nanos / 1_000_000);
        }
        return format!("{}ms", d.as_millis());
    }

    let mut secs = d.as_secs();
    let mut out = String::new();
    for (unit, size) in [("h", 3600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{unit}", secs / size));
            secs %= size;
        }
    }
    out
}

/// `#[serde(with = "conflux_core::duration::serde_str")]` for `Duration`
/// fields written as literals.
pub mod serde_str {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Secs(u64),
            Unset,
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => super::parse_duration(&s).map_err(de::Error::custom),
            Raw::Secs(n) => Ok(Duration::from_secs(n)),
            Raw::Unset => Ok(Duration::ZERO),
        }
    }
}
