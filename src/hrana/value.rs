//! HRANA wire value encoding (§4.4 "Value encoding").
//!
//! The wire format is a tagged union `null | integer | float | text | blob`.
//! Integers travel as decimal strings so large values survive JSON's
//! float-based number type unscathed; whether an integer is "safe" decides
//! whether it round-trips through an `f64` or stays a precise `i64`.

use serde::{Deserialize, Serialize};

/// A value as carried over the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HranaValue {
    Null,
    /// Decimal-string integer, e.g. `"42"` or `"-9223372036854775808"`.
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    /// Base64-encoded bytes.
    Blob { base64: String },
}

/// The largest integer magnitude an `f64` can represent without losing
/// precision, mirroring JavaScript's `Number.isSafeInteger` bound (2^53 - 1).
pub(crate) const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;
pub(crate) const MIN_SAFE_INTEGER: i64 = -9_007_199_254_740_991;

/// An in-memory value decoded from the wire, or about to be encoded onto it.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    /// A "safe" integer, kept as `f64` the way a JS-hosted adapter would see it.
    SafeInteger(f64),
    /// An integer outside the safe range, kept at full `i64` precision.
    BigInteger(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
}

impl HranaValue {
    /// Encode an in-memory scalar onto the wire.
    pub fn encode(value: &Scalar) -> Self {
        match value {
            Scalar::Null => HranaValue::Null,
            Scalar::SafeInteger(n) => HranaValue::Integer {
                value: (*n as i64).to_string(),
            },
            Scalar::BigInteger(n) => HranaValue::Integer {
                value: n.to_string(),
            },
            Scalar::Float(f) => HranaValue::Float { value: *f },
            Scalar::Text(s) => HranaValue::Text { value: s.clone() },
            Scalar::Blob(bytes) => HranaValue::Blob {
                base64: crate::worker::instance::encode_body(bytes),
            },
            Scalar::Bool(b) => HranaValue::Integer {
                value: if *b { "1" } else { "0" }.to_string(),
            },
        }
    }

    /// Decode a wire value into an in-memory scalar. Malformed integers,
    /// malformed base64, and any tag this enum doesn't know about all
    /// decode to `Scalar::Null` rather than erroring (§4.4).
    pub fn decode(&self) -> Scalar {
        match self {
            HranaValue::Null => Scalar::Null,
            HranaValue::Integer { value } => match value.parse::<i64>() {
                Ok(n) if is_safe_integer(n) => Scalar::SafeInteger(n as f64),
                Ok(n) => Scalar::BigInteger(n),
                Err(_) => Scalar::Null,
            },
            HranaValue::Float { value } => Scalar::Float(*value),
            HranaValue::Text { value } => Scalar::Text(value.clone()),
            HranaValue::Blob { base64 } => match crate::worker::instance::decode_body(base64) {
                Ok(bytes) => Scalar::Blob(bytes),
                Err(_) => Scalar::Null,
            },
        }
    }
}

pub(crate) fn is_safe_integer(n: i64) -> bool {
    (MIN_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_null() {
        let wire = HranaValue::encode(&Scalar::Null);
        assert_eq!(wire, HranaValue::Null);
        assert_eq!(wire.decode(), Scalar::Null);
    }

    #[test]
    fn round_trips_short_text() {
        let wire = HranaValue::encode(&Scalar::Text("hello".to_string()));
        assert_eq!(wire.decode(), Scalar::Text("hello".to_string()));
    }

    #[test]
    fn round_trips_safe_integer_as_decimal_string() {
        let wire = HranaValue::encode(&Scalar::SafeInteger(42.0));
        match &wire {
            HranaValue::Integer { value } => assert_eq!(value, "42"),
            other => panic!("expected Integer, got {other:?}"),
        }
        assert_eq!(wire.decode(), Scalar::SafeInteger(42.0));
    }

    #[test]
    fn round_trips_large_integer_at_full_precision() {
        let big = MAX_SAFE_INTEGER + 1;
        let wire = HranaValue::encode(&Scalar::BigInteger(big));
        assert_eq!(wire.decode(), Scalar::BigInteger(big));
    }

    #[test]
    fn round_trips_float() {
        let wire = HranaValue::encode(&Scalar::Float(1.5));
        assert_eq!(wire.decode(), Scalar::Float(1.5));
    }

    #[test]
    fn round_trips_blob() {
        let bytes = vec![0u8, 1, 2, 255];
        let wire = HranaValue::encode(&Scalar::Blob(bytes.clone()));
        assert_eq!(wire.decode(), Scalar::Blob(bytes));
    }

    #[test]
    fn bool_encodes_as_integer_zero_or_one() {
        assert_eq!(
            HranaValue::encode(&Scalar::Bool(true)),
            HranaValue::Integer { value: "1".into() }
        );
        assert_eq!(
            HranaValue::encode(&Scalar::Bool(false)),
            HranaValue::Integer { value: "0".into() }
        );
    }

    #[test]
    fn malformed_integer_decodes_to_null() {
        let wire = HranaValue::Integer {
            value: "not-a-number".to_string(),
        };
        assert_eq!(wire.decode(), Scalar::Null);
    }

    #[test]
    fn malformed_blob_decodes_to_null() {
        let wire = HranaValue::Blob {
            base64: "!!!not base64!!!".to_string(),
        };
        assert_eq!(wire.decode(), Scalar::Null);
    }
}
