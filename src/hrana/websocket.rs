//! WebSocket bridge for the HRANA pipeline (§4.4 "WebSocket bridge").
//!
//! Each connection carries `{adapterType, namespace, baton}`; each client
//! frame `{request_id, request}` is wrapped as a single-request pipeline
//! and the response sent back tagged with the same `request_id`. The
//! connection's baton is updated after every exchange.

use axum::extract::ws::{Message, WebSocket};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::{PipelineRequest, StreamRequest, StreamResult};
use super::server::HranaServer;

#[derive(Debug, Deserialize)]
struct ClientFrame {
    request_id: i64,
    request: StreamRequest,
}

#[derive(Debug, Serialize)]
struct ServerFrame {
    request_id: i64,
    response: StreamResult,
}

/// Per-connection state: the core does not implement connection auth or
/// adapter negotiation beyond reading these three fields from the first
/// frame's headers/query (left to the embedding application).
pub struct ConnectionState {
    pub adapter_type: String,
    pub namespace: Option<String>,
    pub baton: Option<Uuid>,
}

/// Drive one WebSocket connection to completion, dispatching each inbound
/// frame through `server.pipeline` and replying with the matching
/// `request_id`. Parse errors and server faults are synthesized as
/// `{request_id: 0, response: {type: error, ...}}` rather than closing the
/// socket (§4.4).
pub async fn run(server: &HranaServer, mut socket: WebSocket, mut state: ConnectionState) {
    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                let fault = ServerFrame {
                    request_id: 0,
                    response: StreamResult::Error {
                        error: crate::error::HranaError::new("BAD_REQUEST", format!("malformed frame: {e}")),
                    },
                };
                if send_frame(&mut socket, &fault).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let pipeline_request = PipelineRequest {
            baton: state.baton,
            requests: vec![frame.request],
        };

        let response = server
            .pipeline(&state.adapter_type, state.namespace.as_deref(), pipeline_request)
            .await;
        state.baton = response.baton;

        let result = response
            .results
            .into_iter()
            .next()
            .unwrap_or_else(|| StreamResult::Error {
                error: crate::error::HranaError::new("INTERNAL_ERROR", "pipeline produced no result"),
            });

        let reply = ServerFrame {
            request_id: frame.request_id,
            response: result,
        };
        if send_frame(&mut socket, &reply).await.is_err() {
            break;
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).expect("ServerFrame serialization cannot fail");
    socket.send(Message::Text(text.into())).await
}
