//! Lowercase hex encoding for raw payloads.

use crate::error::{ParseError, ParseResult};

/// Encode bytes as lowercase hex.
///
/// ```
/// assert_eq!(aquable_types::hex::encode(&[0x5B, 0x0A]), "5b0a");
/// ```
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Decode a hex string (either case).
///
/// # Errors
///
/// Returns [`ParseError::InvalidValue`] for odd lengths or non-hex digits.
pub fn decode(s: &str) -> ParseResult<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(ParseError::InvalidValue(format!("odd-length hex '{s}'")));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| ParseError::InvalidValue(format!("invalid hex '{s}'")))
        })
        .collect()
}

#[cfg(feature = "serde")]
pub(crate) mod serde_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode(&s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
