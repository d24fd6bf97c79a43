//! Worker message protocol (§6): a discriminated union framed as
//! newline-delimited JSON over the worker process's stdio pipes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One HTTP request forwarded to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Base64-encoded body, or `None` for an empty body.
    pub body: Option<String>,
}

/// One HTTP response produced by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

/// Bidirectional, message-framed protocol between the supervisor and a
/// single worker process (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum WorkerMessage {
    /// worker → supervisor, exactly once during lifetime.
    Ready,
    /// supervisor → worker.
    Request {
        #[serde(rename = "reqId")]
        req_id: Uuid,
        req: WireRequest,
    },
    /// worker → supervisor.
    Response {
        #[serde(rename = "reqId")]
        req_id: Uuid,
        res: WireResponse,
    },
    /// worker → supervisor.
    Error {
        #[serde(rename = "reqId")]
        req_id: Option<Uuid>,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    /// supervisor → worker; edge-triggered, fired once per idle transition.
    Idle,
    /// supervisor → worker; worker should release resources before the
    /// forced-kill grace period expires.
    Terminate,
}

impl WorkerMessage {
    /// The correlation id carried by request/response/error messages, if any.
    ///
    /// Per §3: "messages without `reqId` that are not `READY` are ignored by
    /// the fetch handler" — this is the hook callers use to apply that rule.
    pub fn req_id(&self) -> Option<Uuid> {
        match self {
            WorkerMessage::Request { req_id, .. } | WorkerMessage::Response { req_id, .. } => {
                Some(*req_id)
            }
            WorkerMessage::Error { req_id, .. } => *req_id,
            WorkerMessage::Ready | WorkerMessage::Idle | WorkerMessage::Terminate => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_has_no_req_id() {
        assert_eq!(WorkerMessage::Ready.req_id(), None);
    }

    #[test]
    fn request_round_trips_through_json() {
        let req_id = Uuid::new_v4();
        let msg = WorkerMessage::Request {
            req_id,
            req: WireRequest {
                method: "GET".into(),
                url: "/".into(),
                headers: HashMap::new(),
                body: None,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"REQUEST\""));
        let parsed: WorkerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.req_id(), Some(req_id));
    }

    #[test]
    fn error_without_req_id_is_ignorable_by_fetch_handlers() {
        let msg = WorkerMessage::Error {
            req_id: None,
            error: "boom".into(),
            stack: None,
        };
        assert_eq!(msg.req_id(), None);
    }
}
