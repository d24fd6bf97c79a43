//! Request pipeline glue (§2 "Data flow", SPEC_FULL "[MODULE] Request
//! Pipeline glue"): turns an inbound HTTP request into a plugin `onRequest`
//! pass, a worker-pool dispatch (or a plugin short-circuit, or a
//! plugin-provided static route), a plugin `onResponse` pass, and —
//! built as an axum `Router` the way `server.rs` composes its own layers.
//!
//! WebSocket upgrades bypass the worker pool entirely and are dispatched to
//! the first plugin whose `base` claims the path (§4.3 "WebSocket
//! handler"), or to the HRANA bridge at its own configured path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{ws::WebSocketUpgrade, Query, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::hrana::request::PipelineRequest;
use crate::hrana::websocket::{self as hrana_ws, ConnectionState};
use crate::plugin::HookOutcome;
use crate::state::AppState;
use crate::worker::instance::{decode_body, encode_body};
use crate::worker::message::{WireRequest, WireResponse};

/// Assemble the full router: health/readiness/metrics, the HRANA pipeline
/// endpoint and its WebSocket sibling (paths from config), and a fallback
/// that carries every other request through the plugin/worker pipeline.
pub fn build_router(state: Arc<AppState>) -> Router {
    let hrana_path = state.config().hrana.pipeline_path.clone();
    let hrana_ws_path = state.config().hrana.websocket_path.clone();

    Router::new()
        .route("/health", get(crate::health::health))
        .route("/readiness", get(crate::health::readiness))
        .route("/metrics", get(crate::health::metrics))
        .route(&hrana_path, post(hrana_pipeline))
        .route(&hrana_ws_path, get(hrana_websocket))
        .fallback(dispatch)
        .with_state(state)
}

/// The HRANA pipeline endpoint (§4.4, §6): one HTTP POST per pipeline.
async fn hrana_pipeline(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<PipelineRequest>,
) -> impl IntoResponse {
    let adapter_type = headers
        .get("x-database-adapter")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("default")
        .to_string();
    let namespace = headers
        .get("x-database-namespace")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = state.hrana().pipeline(&adapter_type, namespace.as_deref(), body).await;
    Json(response)
}

/// The HRANA WebSocket sibling path (§4.4 "WebSocket bridge"). Adapter
/// type/namespace are taken from query parameters since a browser
/// WebSocket handshake cannot set arbitrary request headers.
async fn hrana_websocket(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let adapter_type = params.get("adapter").cloned().unwrap_or_else(|| "default".to_string());
    let namespace = params.get("namespace").cloned();

    ws.on_upgrade(move |socket| async move {
        let conn_state = ConnectionState {
            adapter_type,
            namespace,
            baton: None,
        };
        hrana_ws::run(state.hrana().as_ref(), socket, conn_state).await;
    })
}

/// Every request that isn't health/readiness/metrics/HRANA lands here:
/// WebSocket upgrades are handed to the first plugin whose `base` claims
/// the path; everything else goes through the plugin `onRequest`/worker
/// dispatch/`onResponse` pipeline.
async fn dispatch(State(state): State<Arc<AppState>>, ws_upgrade: Option<WebSocketUpgrade>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();

    if let Some(ws) = ws_upgrade {
        return match state.plugins().resolve_plugin_app(&path) {
            Some(plugin) => {
                let ctx = state.plugins().context_for(plugin.name());
                ws.on_upgrade(move |socket| async move {
                    plugin.on_websocket(socket, &ctx).await;
                })
            }
            None => (StatusCode::NOT_FOUND, "no plugin claims this path").into_response(),
        };
    }

    match route_request(&state, parts, body, &path).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn route_request(
    state: &Arc<AppState>,
    parts: axum::http::request::Parts,
    body: Body,
    path: &str,
) -> Result<Response> {
    let max_body = state.config().pool.max_body_bytes;
    let bytes = axum::body::to_bytes(body, max_body)
        .await
        .map_err(|e| Error::BadRequest(format!("failed to read request body: {e}")))?;

    let wire_req = to_wire_request(&parts, &bytes);
    let plugins = state.plugins();
    let ctx_for = |name: &str| plugins.context_for(name);

    // Plugin-provided static routes (§4.3.1): wrapped with the
    // deny-by-default auth-wrap instead of the ordinary "log and
    // continue" onRequest semantics.
    if let Some((owner, handler)) = plugins.route_handler(path) {
        let outcome = plugins.run_on_request_auth_wrap(wire_req, ctx_for).await?;
        let response = match outcome {
            HookOutcome::Respond(resp) => resp,
            HookOutcome::Continue(modified) => {
                tracing::debug!(plugin = %owner, path, "dispatching to plugin-provided static route");
                handler(modified).await?
            }
        };
        let response = plugins.run_on_response(response, ctx_for).await?;
        return Ok(from_wire_response(response));
    }

    let outcome = plugins.run_on_request(wire_req, ctx_for).await?;
    let response = match outcome {
        HookOutcome::Respond(resp) => resp,
        HookOutcome::Continue(modified) => dispatch_to_worker(state, path, modified).await?,
    };
    let response = plugins.run_on_response(response, ctx_for).await?;
    Ok(from_wire_response(response))
}

/// Resolve the tenant's application directory from the request path's
/// first segment, fetch a worker for it, and apply `<base>`
/// injection/relative-path rewriting to an HTML response (§1 Non-goals:
/// "optional `<base>` injection and relative-path rewriting for proxied
/// HTML" is the only content transform the core performs).
async fn dispatch_to_worker(state: &Arc<AppState>, path: &str, mut req: WireRequest) -> Result<WireResponse> {
    let mut segments = path.trim_start_matches('/').splitn(2, '/');
    let tenant = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::NotFound("no tenant application in request path".to_string()))?;
    let rest = segments.next().unwrap_or("");

    let apps_root = state.config().pool.apps_root.clone();
    let app_dir = resolve_app_dir(&apps_root, tenant)
        .await
        .ok_or_else(|| Error::NotFound(format!("no application directory for tenant '{tenant}'")))?;

    let manifest_version = read_manifest_version(&app_dir).await;
    let query = req.url.split_once('?').map(|(_, q)| q.to_string());
    req.url = match query {
        Some(q) if !q.is_empty() => format!("/{rest}?{q}"),
        _ => format!("/{rest}"),
    };

    let app_dir_str = app_dir.to_string_lossy().into_owned();
    let mut response = state
        .pool()
        .fetch(&app_dir_str, manifest_version.as_deref(), HashMap::new(), req)
        .await?;

    if is_html_response(&response) {
        if let Some(encoded) = &response.body {
            if let Ok(raw) = decode_body(encoded) {
                let html = String::from_utf8_lossy(&raw);
                let rewritten = rewrite_proxied_html(&html, &format!("/{tenant}"));
                response.body = Some(encode_body(rewritten.as_bytes()));
            }
        }
    }

    Ok(response)
}

/// Find the directory backing `tenant`: either `apps_root/tenant` directly,
/// or a sibling entry named `tenant` or `tenant@<version>` (§4.1
/// "Resolution of the application key" describes the key layouts; this is
/// the pipeline-side half — mapping a URL segment to a directory at all).
async fn resolve_app_dir(apps_root: &Path, tenant: &str) -> Option<PathBuf> {
    let direct = apps_root.join(tenant);
    if tokio::fs::metadata(&direct).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Some(direct);
    }

    let mut entries = tokio::fs::read_dir(apps_root).await.ok()?;
    let prefix = format!("{tenant}@");
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == tenant || name.starts_with(&prefix) {
            return Some(entry.path());
        }
    }
    None
}

/// Read `version` out of a tenant directory's `package.json`, if present
/// (§4.1: "a `package.json` ... overrides the folder-derived version").
async fn read_manifest_version(app_dir: &Path) -> Option<String> {
    let raw = tokio::fs::read_to_string(app_dir.join("package.json")).await.ok()?;
    let value: Value = serde_json::from_str(&raw).ok()?;
    value.get("version")?.as_str().map(str::to_string)
}

fn is_html_response(response: &WireResponse) -> bool {
    response.headers.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("content-type") && v.to_ascii_lowercase().trim_start().starts_with("text/html")
    })
}

static ROOT_RELATIVE_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(href|src|action)="/([^"]*)""#).expect("fixed HTML attribute pattern"));

/// Inject a `<base href="{mount_prefix}/">` tag and rewrite root-relative
/// `href`/`src`/`action` attributes so a tenant app's own absolute paths
/// (e.g. `/style.css`) keep resolving once it is mounted under a
/// tenant-prefixed URL instead of at `/`. A `<base>` tag alone does not fix
/// root-relative paths — browsers resolve those against the origin, not the
/// base — hence the two mechanisms run together (§1 Non-goals).
fn rewrite_proxied_html(html: &str, mount_prefix: &str) -> String {
    let prefix = mount_prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return html.to_string();
    }
    let bare_prefix = prefix.trim_start_matches('/');

    let rewritten = ROOT_RELATIVE_ATTR.replace_all(html, |caps: &regex::Captures| {
        let attr = &caps[1];
        let rest = &caps[2];
        if rest.starts_with(bare_prefix) {
            caps[0].to_string()
        } else {
            format!(r#"{attr}="{prefix}/{rest}""#)
        }
    });

    let mut out = rewritten.into_owned();
    if let Some(head_offset) = out.to_ascii_lowercase().find("<head>") {
        let insert_at = head_offset + "<head>".len();
        out.insert_str(insert_at, &format!(r#"<base href="{prefix}/">"#));
    }
    out
}

fn to_wire_request(parts: &axum::http::request::Parts, body: &Bytes) -> WireRequest {
    let mut headers = HashMap::new();
    for (name, value) in parts.headers.iter() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_string(), v.to_string());
        }
    }
    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let body = if body.is_empty() { None } else { Some(encode_body(body)) };

    WireRequest {
        method: parts.method.to_string(),
        url,
        headers,
        body,
    }
}

fn from_wire_response(res: WireResponse) -> Response {
    let mut builder = axum::http::Response::builder().status(res.status);
    for (k, v) in &res.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
            builder = builder.header(name, value);
        }
    }
    let body_bytes = res
        .body
        .as_deref()
        .and_then(|b| decode_body(b).ok())
        .unwrap_or_default();

    builder
        .body(Body::from(body_bytes))
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_injects_base_tag_after_head() {
        let html = "<html><head><title>t</title></head><body></body></html>";
        let out = rewrite_proxied_html(html, "/acme");
        assert!(out.contains(r#"<head><base href="/acme/">"#));
    }

    #[test]
    fn rewrite_prefixes_root_relative_attributes() {
        let html = r#"<img src="/logo.png"><a href="/about">x</a>"#;
        let out = rewrite_proxied_html(html, "/acme");
        assert!(out.contains(r#"src="/acme/logo.png""#));
        assert!(out.contains(r#"href="/acme/about""#));
    }

    #[test]
    fn rewrite_leaves_already_prefixed_attributes_alone() {
        let html = r#"<img src="/acme/logo.png">"#;
        let out = rewrite_proxied_html(html, "/acme");
        assert_eq!(out, html);
    }

    #[test]
    fn rewrite_is_a_no_op_for_root_mounted_apps() {
        let html = r#"<img src="/logo.png">"#;
        assert_eq!(rewrite_proxied_html(html, "/"), html);
    }

    #[test]
    fn is_html_response_checks_content_type_case_insensitively() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/html; charset=utf-8".to_string());
        let response = WireResponse {
            status: 200,
            headers,
            body: None,
        };
        assert!(is_html_response(&response));
    }

    #[test]
    fn is_html_response_false_for_json() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let response = WireResponse {
            status: 200,
            headers,
            body: None,
        };
        assert!(!is_html_response(&response));
    }
}
