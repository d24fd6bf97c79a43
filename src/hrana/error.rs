//! Adapter error normalization (§4.4 "Error mapping").
//!
//! Mirrors the teacher's `DatabaseOperation`/`DatabaseErrorKind` pairing
//! idiom from `error.rs`, but feeds a wire `{code, message}` pair instead
//! of an HTTP response: adapters report a raw code (as the underlying
//! driver gave it) plus a message, and this module normalizes that into
//! the fixed `SQLITE_*`/`LIBSQL_*` vocabulary the HRANA wire format uses.

use crate::error::HranaError;

/// The raw error code an adapter observed, before normalization.
#[derive(Debug, Clone)]
pub enum RawCode {
    /// A string code as reported by the driver (e.g. `"SQLITE_CONSTRAINT"`
    /// or a driver-specific string that isn't already namespaced).
    Text(String),
    /// A numeric primary SQLite result code.
    Numeric(i64),
}

/// An error an adapter raised while executing a statement.
#[derive(Debug, Clone)]
pub struct AdapterError {
    pub code: Option<RawCode>,
    pub message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: RawCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

/// Fixed numeric-primary-code table (§4.4 rule 3), the common subset of
/// SQLite's primary result codes.
fn numeric_code_table(code: i64) -> Option<&'static str> {
    match code {
        1 => Some("SQLITE_ERROR"),
        5 => Some("SQLITE_BUSY"),
        6 => Some("SQLITE_LOCKED"),
        7 => Some("SQLITE_NOMEM"),
        8 => Some("SQLITE_READONLY"),
        10 => Some("SQLITE_IOERR"),
        11 => Some("SQLITE_CORRUPT"),
        13 => Some("SQLITE_FULL"),
        14 => Some("SQLITE_CANTOPEN"),
        19 => Some("SQLITE_CONSTRAINT"),
        20 => Some("SQLITE_MISMATCH"),
        21 => Some("SQLITE_MISUSE"),
        1555 => Some("SQLITE_CONSTRAINT_PRIMARYKEY"),
        2067 => Some("SQLITE_CONSTRAINT_ROWID"),
        2579 => Some("SQLITE_CONSTRAINT_UNIQUE"),
        _ => None,
    }
}

/// Normalize an adapter error into the wire `{code, message}` pair,
/// applying the four rules in order (§4.4).
pub fn map_error(err: &AdapterError) -> HranaError {
    match &err.code {
        Some(RawCode::Text(s)) => {
            let upper = s.to_uppercase();
            if upper.starts_with("SQLITE_") || upper.starts_with("LIBSQL_") {
                return HranaError::new(s.clone(), err.message.clone());
            }
            return HranaError::new(upper, err.message.clone());
        }
        Some(RawCode::Numeric(n)) => {
            if let Some(code) = numeric_code_table(*n) {
                return HranaError::new(code, err.message.clone());
            }
        }
        None => {}
    }
    HranaError::new(infer_code_from_message(&err.message), err.message.clone())
}

/// Rule 4: infer a code from message substrings when no usable code was
/// attached to the error at all.
fn infer_code_from_message(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("unique constraint") || lower.contains("duplicate") {
        "SQLITE_CONSTRAINT_UNIQUE"
    } else if lower.contains("foreign key constraint") {
        "SQLITE_CONSTRAINT_FOREIGNKEY"
    } else if lower.contains("not null constraint") {
        "SQLITE_CONSTRAINT_NOTNULL"
    } else if lower.contains("primary key constraint") {
        "SQLITE_CONSTRAINT_PRIMARYKEY"
    } else if lower.contains("check constraint") {
        "SQLITE_CONSTRAINT_CHECK"
    } else if lower.contains("constraint") {
        "SQLITE_CONSTRAINT"
    } else if lower.contains("busy") || lower.contains("locked") {
        "SQLITE_BUSY"
    } else if lower.contains("readonly") || lower.contains("read-only") {
        "SQLITE_READONLY"
    } else if lower.contains("syntax error")
        || lower.contains("near \"")
        || lower.contains("no such table")
        || lower.contains("no such column")
    {
        "SQLITE_ERROR"
    } else if lower.contains("authorization") || lower.contains("permission") {
        "SQLITE_AUTH"
    } else {
        "SQLITE_ERROR"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_code_already_namespaced_passes_through_unchanged() {
        let err = AdapterError::with_code(RawCode::Text("SQLITE_CONSTRAINT".into()), "boom");
        assert_eq!(map_error(&err).code, "SQLITE_CONSTRAINT");
    }

    #[test]
    fn text_code_not_namespaced_is_uppercased() {
        let err = AdapterError::with_code(RawCode::Text("weird_code".into()), "boom");
        assert_eq!(map_error(&err).code, "WEIRD_CODE");
    }

    #[test]
    fn numeric_code_maps_through_fixed_table() {
        let err = AdapterError::with_code(RawCode::Numeric(19), "constraint failed");
        assert_eq!(map_error(&err).code, "SQLITE_CONSTRAINT");
    }

    #[test]
    fn message_inference_detects_unique_violation() {
        let err = AdapterError::new("UNIQUE constraint failed: users.email");
        assert_eq!(map_error(&err).code, "SQLITE_CONSTRAINT_UNIQUE");
    }

    #[test]
    fn message_inference_falls_back_to_generic_error() {
        let err = AdapterError::new("something went wrong");
        assert_eq!(map_error(&err).code, "SQLITE_ERROR");
    }
}
