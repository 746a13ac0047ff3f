//! Weakly typed decoding of merged config maps into user types.
//!
//! Environment variables and flags arrive as strings, so the decoder accepts
//! `"9090"` for a `u16`, `"true"` for a `bool`, `"a,b"` for a `Vec<String>`
//! and `"30s"` for a `std::time::Duration`. Error messages carry the dotted
//! path of the offending field.
//!
//! A struct field absent from the map decodes as its zero value (`""`, `0`,
//! `false`, empty collections, `None`), so a partial object under an
//! `Option` field fills in the rest. Field-level `#[serde(default = ..)]`
//! functions are not consulted for absent fields, and types using
//! `#[serde(flatten)]` need a container `#[serde(default)]` for the same
//! effect since serde decodes them without a field list.

use std::fmt;
use std::time::Duration;

use serde::de::{
    self, DeserializeOwned, DeserializeSeed, EnumAccess, IntoDeserializer, MapAccess, SeqAccess,
    Unexpected, VariantAccess, Visitor,
};
use serde_json::{Map, Number, Value};

use conflux_core::parse_duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// Dotted path of the failing field; empty at the root.
    pub path: String,
    pub message: String,
}

impl DecodeError {
    fn within(mut self, segment: &str) -> Self {
        self.path = if self.path.is_empty() {
            segment.to_string()
        } else if self.path.starts_with('[') {
            format!("{segment}{}", self.path)
        } else {
            format!("{segment}.{}", self.path)
        };
        self
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "field '{}': {}", self.path, self.message)
        }
    }
}

impl std::error::Error for DecodeError {}

impl de::Error for DecodeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self {
            path: String::new(),
            message: msg.to_string(),
        }
    }
}

/// Decode `value` into `T` with string coercion.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    T::deserialize(Lenient(value))
}

fn unexpected(value: &Value) -> Unexpected<'_> {
    match value {
        Value::Null => Unexpected::Unit,
        Value::Bool(b) => Unexpected::Bool(*b),
        Value::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(u), _) => Unexpected::Unsigned(u),
            (None, Some(i)) => Unexpected::Signed(i),
            _ => Unexpected::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Unexpected::Str(s),
        Value::Array(_) => Unexpected::Seq,
        Value::Object(_) => Unexpected::Map,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

fn visit_number<'de, V: Visitor<'de>>(n: &Number, visitor: V) -> Result<V::Value, DecodeError> {
    if let Some(u) = n.as_u64() {
        visitor.visit_u64(u)
    } else if let Some(i) = n.as_i64() {
        visitor.visit_i64(i)
    } else {
        visitor.visit_f64(n.as_f64().unwrap_or(f64::NAN))
    }
}

struct Lenient(Value);

impl Lenient {
    fn invalid_type<'de, V: Visitor<'de>>(&self, visitor: &V) -> DecodeError {
        de::Error::invalid_type(unexpected(&self.0), visitor)
    }

    fn deserialize_integer<'de, V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match &self.0 {
            Value::Number(n) => match n.as_f64() {
                Some(f) if n.is_f64() && f.is_finite() && f.fract() == 0.0 => visitor.visit_i64(f as i64),
                _ => visit_number(n, visitor),
            },
            Value::String(s) => {
                let t = s.trim();
                if let Ok(i) = t.parse::<i64>() {
                    visitor.visit_i64(i)
                } else if let Ok(u) = t.parse::<u64>() {
                    visitor.visit_u64(u)
                } else {
                    Err(de::Error::invalid_value(Unexpected::Str(s), &visitor))
                }
            }
            Value::Bool(b) => visitor.visit_u64(u64::from(*b)),
            Value::Null => visitor.visit_u64(0),
            _ => Err(self.invalid_type(&visitor)),
        }
    }

    fn deserialize_float<'de, V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match &self.0 {
            Value::Number(n) => visitor.visit_f64(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => visitor.visit_f64(f),
                Err(_) => Err(de::Error::invalid_value(Unexpected::Str(s), &visitor)),
            },
            Value::Null => visitor.visit_f64(0.0),
            _ => Err(self.invalid_type(&visitor)),
        }
    }
}

macro_rules! integers {
    ($($method:ident),+) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
            self.deserialize_integer(visitor)
        }
    )+};
}

impl<'de> de::Deserializer<'de> for Lenient {
    type Error = DecodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.0 {
            Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(b),
            Value::Number(n) => visit_number(&n, visitor),
            Value::String(s) => visitor.visit_string(s),
            Value::Array(items) => visitor.visit_seq(SeqDeserializer::new(items)),
            Value::Object(map) => visitor.visit_map(MapDeserializer::new(map)),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match &self.0 {
            Value::Bool(b) => visitor.visit_bool(*b),
            Value::String(s) => match parse_bool(s) {
                Some(b) => visitor.visit_bool(b),
                None => Err(de::Error::invalid_value(Unexpected::Str(s), &visitor)),
            },
            Value::Number(n) => match n.as_f64() {
                Some(f) => visitor.visit_bool(f != 0.0),
                None => Err(self.invalid_type(&visitor)),
            },
            Value::Null => visitor.visit_bool(false),
            _ => Err(self.invalid_type(&visitor)),
        }
    }

    integers!(
        deserialize_i8,
        deserialize_i16,
        deserialize_i32,
        deserialize_i64,
        deserialize_i128,
        deserialize_u8,
        deserialize_u16,
        deserialize_u32,
        deserialize_u64,
        deserialize_u128
    );

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_float(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_float(visitor)
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.0 {
            Value::String(s) => visitor.visit_string(s),
            Value::Number(n) => visitor.visit_string(n.to_string()),
            Value::Bool(b) => visitor.visit_string(b.to_string()),
            Value::Null => visitor.visit_string(String::new()),
            other => Err(Lenient(other).invalid_type(&visitor)),
        }
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_any(visitor)
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_any(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.0 {
            Value::Null => visitor.visit_none(),
            other => visitor.visit_some(Lenient(other)),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        visitor.visit_newtype_struct(self)
    }

    /// Scalars become one-element sequences; strings split on commas.
    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        let items = match self.0 {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            Value::String(s) => s
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| Value::String(p.to_string()))
                .collect(),
            Value::Object(map) => return Err(Lenient(Value::Object(map)).invalid_type(&visitor)),
            scalar => vec![scalar],
        };
        visitor.visit_seq(SeqDeserializer::new(items))
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.0 {
            Value::Object(map) => visitor.visit_map(MapDeserializer::new(map)),
            Value::Null => visitor.visit_map(MapDeserializer::new(Map::new())),
            other => Err(Lenient(other).invalid_type(&visitor)),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        if name == "Duration" && fields == ["secs", "nanos"] {
            let parsed = match &self.0 {
                Value::String(s) => Some(parse_duration(s).map_err(|e| {
                    <DecodeError as de::Error>::custom(format!("invalid duration '{s}': {e}"))
                })?),
                Value::Number(n) => n.as_u64().map(Duration::from_secs),
                Value::Null => Some(Duration::ZERO),
                _ => None,
            };
            if let Some(d) = parsed {
                let mut map = Map::new();
                map.insert("secs".into(), Value::from(d.as_secs()));
                map.insert("nanos".into(), Value::from(d.subsec_nanos()));
                return visitor.visit_map(MapDeserializer::new(map));
            }
        }
        let mut map = match self.0 {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(Lenient(other).invalid_type(&visitor)),
        };
        for field in fields {
            if !map.contains_key(*field) {
                map.insert((*field).to_string(), Value::Null);
            }
        }
        visitor.visit_map(MapDeserializer::new(map))
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        match self.0 {
            Value::String(variant) => visitor.visit_enum(EnumDeserializer { variant, value: Value::Null }),
            Value::Object(map) if map.len() == 1 => {
                let Some((variant, value)) = map.into_iter().next() else {
                    return Err(de::Error::custom("empty enum map"));
                };
                visitor.visit_enum(EnumDeserializer { variant, value })
            }
            other => Err(Lenient(other).invalid_type(&visitor)),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }
}

struct SeqDeserializer {
    iter: std::vec::IntoIter<Value>,
    index: usize,
}

impl SeqDeserializer {
    fn new(items: Vec<Value>) -> Self {
        Self {
            iter: items.into_iter(),
            index: 0,
        }
    }
}

impl<'de> SeqAccess<'de> for SeqDeserializer {
    type Error = DecodeError;

    fn next_element_seed<S: DeserializeSeed<'de>>(&mut self, seed: S) -> Result<Option<S::Value>, DecodeError> {
        let Some(item) = self.iter.next() else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;
        seed.deserialize(Lenient(item))
            .map(Some)
            .map_err(|e| e.within(&format!("[{index}]")))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer {
    iter: serde_json::map::IntoIter,
    pending: Option<(String, Value)>,
}

impl MapDeserializer {
    fn new(map: Map<String, Value>) -> Self {
        Self {
            iter: map.into_iter(),
            pending: None,
        }
    }
}

impl<'de> MapAccess<'de> for MapDeserializer {
    type Error = DecodeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>, DecodeError> {
        let Some((key, value)) = self.iter.next() else {
            return Ok(None);
        };
        let decoded = seed
            .deserialize(Lenient(Value::String(key.clone())))
            .map_err(|e| e.within(&key))?;
        self.pending = Some((key, value));
        Ok(Some(decoded))
    }

    fn next_value_seed<S: DeserializeSeed<'de>>(&mut self, seed: S) -> Result<S::Value, DecodeError> {
        let Some((key, value)) = self.pending.take() else {
            return Err(de::Error::custom("map value requested before its key"));
        };
        seed.deserialize(Lenient(value)).map_err(|e| e.within(&key))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct EnumDeserializer {
    variant: String,
    value: Value,
}

impl<'de> EnumAccess<'de> for EnumDeserializer {
    type Error = DecodeError;
    type Variant = Lenient;

    fn variant_seed<S: DeserializeSeed<'de>>(self, seed: S) -> Result<(S::Value, Lenient), DecodeError> {
        let variant: de::value::StringDeserializer<DecodeError> = self.variant.into_deserializer();
        let decoded = seed.deserialize(variant)?;
        Ok((decoded, Lenient(self.value)))
    }
}

impl<'de> VariantAccess<'de> for Lenient {
    type Error = DecodeError;

    fn unit_variant(self) -> Result<(), DecodeError> {
        Ok(())
    }

    fn newtype_variant_seed<S: DeserializeSeed<'de>>(self, seed: S) -> Result<S::Value, DecodeError> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, DecodeError> {
        de::Deserializer::deserialize_seq(self, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        de::Deserializer::deserialize_map(self, visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Server {
        host: String,
        port: u16,
        tls: bool,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "lowercase")]
    enum Level {
        Debug,
        Info,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Root {
        server: Server,
        tags: Vec<String>,
        ratio: f64,
        timeout: Duration,
        level: Level,
        limits: HashMap<u16, String>,
        note: Option<String>,
    }

    #[test]
    fn coerces_string_values() {
        let root: Root = from_value(json!({
            "server": {"host": 8080, "port": "9090", "tls": "true"},
            "tags": "a, b,,c",
            "ratio": "0.25",
            "timeout": "1m30s",
            "level": "info",
            "limits": {"10": "low"},
            "note": null
        }))
        .unwrap();
        assert_eq!(root.server, Server { host: "8080".into(), port: 9090, tls: true });
        assert_eq!(root.tags, vec!["a", "b", "c"]);
        assert_eq!(root.ratio, 0.25);
        assert_eq!(root.timeout, Duration::from_secs(90));
        assert_eq!(root.level, Level::Info);
        assert_eq!(root.limits[&10], "low");
        assert_eq!(root.note, None);
    }

    #[test]
    fn whole_floats_fit_integers() {
        let server: Server = from_value(json!({"host": "h", "port": 8080.0, "tls": 0})).unwrap();
        assert_eq!(server.port, 8080);
        assert!(!server.tls);
    }

    #[test]
    fn errors_carry_field_path() {
        let err = from_value::<Root>(json!({
            "server": {"host": "h", "port": "not-a-port", "tls": false},
            "level": "debug",
        }))
        .unwrap_err();
        assert_eq!(err.path, "server.port");

        let err = from_value::<Vec<Server>>(json!([{"host": "h", "port": 70000, "tls": true}])).unwrap_err();
        assert_eq!(err.path, "[0].port");
    }

    #[test]
    fn missing_fields_decode_as_zero_values() {
        let root: Root = from_value(json!({"server": {"host": "h"}, "level": "debug"})).unwrap();
        assert_eq!(root.server, Server { host: "h".into(), port: 0, tls: false });
        assert!(root.tags.is_empty());
        assert_eq!(root.ratio, 0.0);
        assert_eq!(root.timeout, Duration::ZERO);
        assert!(root.limits.is_empty());
        assert_eq!(root.note, None);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Producer {
        brokers: Vec<String>,
        client_id: String,
        retries: u32,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct WithOptional {
        producer: Option<Producer>,
        boxed: Option<Box<Producer>>,
    }

    #[test]
    fn partial_object_under_option_is_completed() {
        let decoded: WithOptional = from_value(json!({
            "producer": {"client_id": "p1"},
            "boxed": {"retries": "3"},
        }))
        .unwrap();
        assert_eq!(
            decoded.producer,
            Some(Producer { brokers: vec![], client_id: "p1".into(), retries: 0 })
        );
        assert_eq!(
            decoded.boxed.as_deref(),
            Some(&Producer { brokers: vec![], client_id: String::new(), retries: 3 })
        );
    }

    #[test]
    fn enum_without_value_is_an_error() {
        let err = from_value::<Root>(json!({"server": {"host": "h"}})).unwrap_err();
        assert_eq!(err.path, "level");
    }
}
