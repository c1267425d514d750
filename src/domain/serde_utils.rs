//! Serde utilities for imgwarm.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;

/// Module to (de)serialize binary payloads as standard base64 strings.
///
/// Cache records are persisted as JSON; embedding the raw bytes as an array
/// of numbers would roughly quadruple their size.
pub mod base64_bytes {
    use super::{Deserializer, Serializer, Visitor, de, fmt};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;

    /// Serializes bytes as a base64 string.
    ///
    /// # Errors
    ///
    /// Returns an error if the serializer fails.
    pub fn serialize<S>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    /// Deserializes bytes from a base64 string.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a string or is not valid base64.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Base64Visitor;

        impl Visitor<'_> for Base64Visitor {
            type Value = Bytes;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a base64 encoded payload")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                STANDARD
                    .decode(value)
                    .map(Bytes::from)
                    .map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(Base64Visitor)
    }
}
