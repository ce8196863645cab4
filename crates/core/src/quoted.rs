//! Serde helpers that write `U256` amounts as quoted decimal strings.
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct Entry {
//!     #[serde(with = "stakecraft_core::quoted")]
//!     amount: U256,
//! }
//! ```

use alloy_primitives::U256;
use serde::{de, Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_decimal(&s).map_err(de::Error::custom)
}

/// Parse a base-10 amount string.
pub fn parse_decimal(s: &str) -> Result<U256, String> {
    U256::from_str_radix(s.trim(), 10).map_err(|e| format!("invalid decimal amount '{}': {}", s, e))
}

/// Same encoding for a list of amounts.
pub mod vec {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(values: &[U256], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for v in values {
            seq.serialize_element(&v.to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<U256>, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| parse_decimal(s).map_err(de::Error::custom))
            .collect()
    }
}
