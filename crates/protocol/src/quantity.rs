//! Serde helpers for `u64` JSON "quantity" values (`0x`-prefixed hex).
//!
//! Deserialization also accepts raw numbers and decimal strings, since RPC
//! providers are not uniform about it.

use serde::{de, Deserialize, Deserializer, Serializer};
use serde_json::Value;

/// Serializes a `u64` as a hex quantity string.
pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{value:#x}"))
}

/// Deserializes a `u64` from a hex quantity string, decimal string, or raw
/// number.
pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => parse_quantity(&s).map_err(de::Error::custom),
        Value::Number(num) => {
            num.as_u64().ok_or_else(|| de::Error::custom("number out of u64 range"))
        }
        _ => Err(de::Error::custom("only string and number quantities are supported")),
    }
}

fn parse_quantity(s: &str) -> Result<u64, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex quantity {s:?}: {e}"))
    } else {
        s.parse().map_err(|e| format!("invalid decimal quantity {s:?}: {e}"))
    }
}

/// Quantity serde for `Option<u64>`.
pub mod opt {
    use super::{de, parse_quantity, Deserialize, Deserializer, Serializer, Value};

    /// Serializes a present `u64` as a hex quantity string.
    pub fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_str(&format!("{v:#x}")),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializes an optional quantity, mapping `null` to `None`.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            Value::String(s) => parse_quantity(&s).map(Some).map_err(de::Error::custom),
            Value::Number(num) => num
                .as_u64()
                .map(Some)
                .ok_or_else(|| de::Error::custom("number out of u64 range")),
            _ => Err(de::Error::custom("only string and number quantities are supported")),
        }
    }
}
