//! # Payload Serialization
//!
//! Purpose: Convert values to and from the transport text used for published
//! messages and parsed reads.
//!
//! `parse` never fails. Text that is not valid JSON comes back as a
//! `Value::String` holding the raw text, so plain strings stored with `set`
//! read back unchanged.

use serde::Serialize;
use serde_json::Value;

/// Serializes `value` into its transport text.
pub fn stringify<T>(value: &T) -> serde_json::Result<String>
where
    T: Serialize + ?Sized,
{
    serde_json::to_string(value)
}

/// Parses transport text, falling back to the raw string.
pub fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
