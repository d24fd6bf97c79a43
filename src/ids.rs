//! Type-safe request identifiers
//!
//! Request IDs use UUIDv7 so they are time-sortable, which makes them useful
//! for distributed tracing and log correlation: `req_<uuidv7>`.

use std::fmt;
use std::str::FromStr;
use http::Request;
use tower_http::request_id::{MakeRequestId, RequestId as TowerRequestId};
use uuid::Uuid;

/// A type-safe request identifier for distributed tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub const PREFIX: &'static str = "req";

    /// Create a new request ID with a UUIDv7 (time-sortable).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn prefix(&self) -> &'static str {
        Self::PREFIX
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl FromStr for RequestId {
    type Err = RequestIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("req_")
            .ok_or_else(|| RequestIdError::InvalidPrefix {
                expected: Self::PREFIX.to_string(),
                actual: s.split('_').next().unwrap_or(s).to_string(),
            })?;
        let uuid = Uuid::parse_str(rest).map_err(RequestIdError::Parse)?;
        Ok(Self(uuid))
    }
}

/// Error type for request ID parsing.
#[derive(Debug, thiserror::Error)]
pub enum RequestIdError {
    #[error("failed to parse request ID: {0}")]
    Parse(#[from] uuid::Error),
    #[error("invalid prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix { expected: String, actual: String },
}

/// A `MakeRequestId` implementation that generates `RequestId`s for tower-http.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeTypedRequestId;

impl MakeRequestId for MakeTypedRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<TowerRequestId> {
        let id = RequestId::new();
        let header_value = http::HeaderValue::from_str(&id.to_string()).ok()?;
        Some(TowerRequestId::new(header_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_round_trips_through_display_and_from_str() {
        let id = RequestId::new();
        let s = id.to_string();
        assert!(s.starts_with("req_"));
        let parsed: RequestId = s.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_wrong_prefix() {
        let err = "evt_not-a-uuid".parse::<RequestId>().unwrap_err();
        assert!(matches!(err, RequestIdError::InvalidPrefix { .. }));
    }
}
