//! Encodings for arbitrary-precision key values.
//!
//! Keys in a 2^134-sized interval do not fit any JSON number type, so records
//! carry them as strings: `0x`-prefixed lowercase hex for positions and range
//! bounds, decimal for counts. The solver wants uppercase hex without prefix.
//! Readers also accept plain JSON integers for values that happen to fit.

use rug::Integer;
use serde::{Deserialize, Deserializer, Serializer};

/// `0x`-prefixed lowercase hex.
pub fn to_hex(n: &Integer) -> String {
    format!("0x{}", n.to_string_radix(16))
}

/// Uppercase hex without prefix, the solver's input-file encoding.
pub fn to_solver_hex(n: &Integer) -> String {
    n.to_string_radix(16).to_uppercase()
}

/// Parse a non-negative hex value with optional `0x`/`0X` prefix.
pub fn parse_hex(text: &str) -> Result<Integer, String> {
    let t = text.trim();
    let digits = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);
    if digits.is_empty() {
        return Err("empty hex value".into());
    }
    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(format!("invalid hex digit {:?}", bad));
    }
    Integer::from_str_radix(digits, 16).map_err(|e| e.to_string())
}

/// Parse a non-negative decimal value.
pub fn parse_decimal(text: &str) -> Result<Integer, String> {
    let t = text.trim();
    if t.is_empty() || !t.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid decimal value {:?}", t));
    }
    Integer::from_str_radix(t, 10).map_err(|e| e.to_string())
}

/// Group decimal digits with commas, e.g. `1234567` → `1,234,567`.
pub fn with_commas(n: &Integer) -> String {
    let text = n.to_string_radix(10);
    let digits = text.trim_start_matches('-');
    let mut out = String::with_capacity(text.len() + digits.len() / 3);
    if text.starts_with('-') {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(u64),
    Str(String),
}

/// Serde adapter: `Integer` as `0x…` hex string.
pub mod hex_string {
    use super::*;

    pub fn serialize<S: Serializer>(n: &Integer, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&to_hex(n))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Integer, D::Error> {
        match NumOrStr::deserialize(d)? {
            NumOrStr::Num(n) => Ok(Integer::from(n)),
            NumOrStr::Str(s) => parse_hex(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Serde adapter: `Integer` as decimal string.
pub mod decimal_string {
    use super::*;

    pub fn serialize<S: Serializer>(n: &Integer, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&n.to_string_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Integer, D::Error> {
        match NumOrStr::deserialize(d)? {
            NumOrStr::Num(n) => Ok(Integer::from(n)),
            NumOrStr::Str(s) => parse_decimal(&s).map_err(serde::de::Error::custom),
        }
    }
}
