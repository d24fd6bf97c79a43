//! Worker instance: the state machine and request/response protocol
//! between the supervisor and a single worker process (§3, §4.2).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use once_cell::sync::Lazy;
use regex::RegexSet;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use uuid::Uuid;

use crate::config::WorkerPoolConfig;
use crate::error::{Error, Result, TimeoutKind, WorkerError};
use crate::worker::message::{WireRequest, WireResponse, WorkerMessage};
use crate::worker::stats::WorkerStats;

const READY_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace period between `TERMINATE` and a forced kill.
const TERMINATE_DELAY_MS: u64 = 250;

/// Sensitive environment-variable name patterns (§4.2, normative in §6).
/// Keys matching any of these are filtered out of the worker's environment.
static SENSITIVE_ENV_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)^(DATABASE|DB)_",
        r"(?i)^(API|AUTH|SECRET|PRIVATE)_?KEY",
        r"(?i)_TOKEN$",
        r"(?i)_SECRET$",
        r"(?i)_PASSWORD$",
        r"(?i)^AWS_",
        r"(?i)^GITHUB_",
        r"(?i)^OPENAI_",
        r"(?i)^ANTHROPIC_",
        r"(?i)^STRIPE_",
    ])
    .expect("sensitive env pattern set is a fixed, valid regex set")
});

/// Filter a caller-provided environment map per §4.2, returning the
/// blocked key names (for logging) alongside the filtered map.
pub fn filter_sensitive_env(env: &HashMap<String, String>) -> (HashMap<String, String>, Vec<String>) {
    let mut kept = HashMap::new();
    let mut blocked = Vec::new();
    for (k, v) in env {
        if SENSITIVE_ENV_PATTERNS.is_match(k) {
            blocked.push(k.clone());
        } else {
            kept.insert(k.clone(), v.clone());
        }
    }
    (kept, blocked)
}

/// Lifecycle stage of a [`WorkerInstance`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLifecycle {
    Constructed,
    Initializing,
    Ready,
    Active,
    Idle,
    Terminated,
}

#[derive(Debug, Default)]
struct Counters {
    request_count: AtomicU64,
    error_count: AtomicU64,
    total_response_time_ms: AtomicU64,
}

/// A single supervised worker process plus its request/response protocol.
///
/// Owns exactly one OS process. Dispatches inbound [`WorkerMessage`]s by
/// `reqId` to whichever `fetch` is waiting on them, per the "per-instance
/// dispatcher task" re-architecture called for in spec §9.
pub struct WorkerInstance {
    pub id: Uuid,
    key: String,
    config: WorkerPoolConfig,

    created_at: Instant,
    last_used_at: RwLock<Instant>,
    counters: Counters,

    has_critical_error: AtomicBool,
    has_idle_been_sent: AtomicBool,

    ready: Arc<Notify>,
    ready_observed: AtomicBool,
    ready_failed: RwLock<Option<String>>,

    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<tokio::process::ChildStdin>>,
    waiters: Arc<Mutex<HashMap<Uuid, oneshot::Sender<WorkerMessage>>>>,

    terminated: AtomicBool,
    lifecycle: RwLock<WorkerLifecycle>,
}

impl WorkerInstance {
    /// Spawn a new worker process for `key` under `app_dir`, filtering the
    /// environment and installing the stdio dispatcher task (§4.2
    /// "Construction").
    pub async fn spawn(
        key: String,
        app_dir: &str,
        config: WorkerPoolConfig,
        env: HashMap<String, String>,
        loopback_api_url: &str,
    ) -> Result<Arc<Self>> {
        let (mut filtered_env, blocked) = filter_sensitive_env(&env);
        for key in &blocked {
            tracing::warn!(env_key = %key, "blocked sensitive environment variable from worker");
        }

        let worker_id = Uuid::new_v4();
        filtered_env.insert("APP_DIR".into(), app_dir.to_string());
        filtered_env.insert("BUNTIME_API_URL".into(), loopback_api_url.to_string());
        filtered_env.insert("ENTRYPOINT".into(), config.entrypoint.clone());
        filtered_env.insert("NODE_ENV".into(), "production".into());
        filtered_env.insert(
            "WORKER_CONFIG".into(),
            serde_json::to_string(&config).unwrap_or_default(),
        );
        filtered_env.insert("WORKER_ID".into(), worker_id.to_string());

        let entrypoint_path = std::path::Path::new(app_dir).join(&config.entrypoint);

        let mut command = Command::new(&entrypoint_path);
        command
            .env_clear()
            .envs(&filtered_env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(Error::Io)?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Worker(WorkerError::Critical(
                "worker process did not expose stdout".into(),
            ))
        })?;

        let instance = Arc::new(Self {
            id: worker_id,
            key,
            config,
            created_at: Instant::now(),
            last_used_at: RwLock::new(Instant::now()),
            counters: Counters::default(),
            has_critical_error: AtomicBool::new(false),
            has_idle_been_sent: AtomicBool::new(false),
            ready: Arc::new(Notify::new()),
            ready_observed: AtomicBool::new(false),
            ready_failed: RwLock::new(None),
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(stdin),
            waiters: Arc::new(Mutex::new(HashMap::new())),
            terminated: AtomicBool::new(false),
            lifecycle: RwLock::new(WorkerLifecycle::Initializing),
        });

        instance.spawn_dispatcher(stdout);
        Ok(instance)
    }

    /// The per-instance dispatcher task: reads newline-delimited JSON
    /// frames from the worker's stdout and routes them by `reqId` to the
    /// pending waiter, per spec §9's re-architecture note.
    fn spawn_dispatcher(self: &Arc<Self>, stdout: tokio::process::ChildStdout) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => this.handle_line(&line).await,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(worker_id = %this.id, error = %e, "worker stdout read error");
                        break;
                    }
                }
            }
            this.on_worker_stream_closed().await;
        });
    }

    async fn handle_line(&self, line: &str) {
        let msg: WorkerMessage = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(worker_id = %self.id, error = %e, raw = %line, "malformed worker message, ignoring");
                return;
            }
        };

        match &msg {
            WorkerMessage::Ready => {
                self.ready_observed.store(true, Ordering::SeqCst);
                *self.lifecycle.write().await = WorkerLifecycle::Ready;
                self.ready.notify_waiters();
            }
            WorkerMessage::Error { req_id: None, error, .. } => {
                // Worker-level error event not tied to a request: critical.
                self.mark_critical(error.clone()).await;
            }
            _ => {
                if let Some(req_id) = msg.req_id() {
                    let mut waiters = self.waiters.lock().await;
                    if let Some(tx) = waiters.remove(&req_id) {
                        let _ = tx.send(msg);
                    }
                }
                // Messages without reqId that aren't READY are ignored
                // (spec §3: "ignored by the fetch handler").
            }
        }
    }

    async fn on_worker_stream_closed(&self) {
        if !self.ready_observed.load(Ordering::SeqCst) {
            *self.ready_failed.write().await =
                Some("worker exited before emitting READY".to_string());
            self.ready.notify_waiters();
        }
    }

    async fn mark_critical(&self, message: String) {
        self.has_critical_error.store(true, Ordering::SeqCst);
        *self.ready_failed.write().await = Some(message.clone());
        self.ready.notify_waiters();
        // Fail all in-flight waiters at once (§9).
        let mut waiters = self.waiters.lock().await;
        for (_, tx) in waiters.drain() {
            let _ = tx.send(WorkerMessage::Error {
                req_id: None,
                error: message.clone(),
                stack: None,
            });
        }
        tracing::error!(worker_id = %self.id, %message, "worker reported critical error");
    }

    /// Await the worker's `READY` handshake, with the 30s timeout from §3.
    async fn await_ready(&self) -> Result<()> {
        if self.has_critical_error.load(Ordering::SeqCst) {
            return Err(Error::Worker(WorkerError::Critical(
                self.ready_failed
                    .read()
                    .await
                    .clone()
                    .unwrap_or_else(|| "worker initialization failed".into()),
            )));
        }
        if self.ready_observed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let notified = self.ready.notified();
        tokio::select! {
            () = notified => {}
            () = tokio::time::sleep(READY_TIMEOUT) => {
                return Err(Error::Timeout {
                    kind: TimeoutKind::WorkerReady,
                    elapsed_ms: READY_TIMEOUT.as_millis() as u64,
                });
            }
        }

        if let Some(message) = self.ready_failed.read().await.clone() {
            return Err(Error::Worker(WorkerError::Critical(message)));
        }
        Ok(())
    }

    /// Is this instance healthy per §4.1's conjunction: not critical, and
    /// under TTL, and under the idle timeout, and under the request cap.
    pub async fn is_healthy(&self) -> bool {
        if self.has_critical_error.load(Ordering::SeqCst) {
            return false;
        }
        let age_ms = self.created_at.elapsed().as_millis() as u64;
        if self.config.ttl_ms != 0 && age_ms >= self.config.ttl_ms {
            return false;
        }
        if self.idle_ms().await >= self.config.idle_timeout_ms {
            return false;
        }
        if self.counters.request_count.load(Ordering::SeqCst) >= self.config.max_requests {
            return false;
        }
        true
    }

    /// Is this instance idle per the configured idle timeout?
    pub async fn is_idle_expired(&self) -> bool {
        self.idle_ms().await >= self.config.idle_timeout_ms
    }

    /// Milliseconds since this instance was last used, for LRU comparisons.
    pub async fn idle_ms(&self) -> u64 {
        self.last_used_at.read().await.elapsed().as_millis() as u64
    }

    pub fn has_critical_error(&self) -> bool {
        self.has_critical_error.load(Ordering::SeqCst)
    }

    pub async fn touch(&self) {
        *self.last_used_at.write().await = Instant::now();
        self.clear_idle_latch();
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            status: crate::worker::stats::WorkerStatus::Online,
            request_count: self.counters.request_count.load(Ordering::SeqCst),
            error_count: self.counters.error_count.load(Ordering::SeqCst),
            total_response_time_ms: self.counters.total_response_time_ms.load(Ordering::SeqCst),
        }
    }

    /// Dispatch one request/response round trip (§4.2 `fetch`).
    pub async fn fetch(&self, req: WireRequest) -> Result<WireResponse> {
        self.await_ready().await?;

        self.counters.request_count.fetch_add(1, Ordering::SeqCst);
        self.touch().await;
        *self.lifecycle.write().await = WorkerLifecycle::Active;

        let req_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(req_id, tx);

        let frame = WorkerMessage::Request {
            req_id,
            req,
        };
        if let Err(e) = self.write_frame(&frame).await {
            self.waiters.lock().await.remove(&req_id);
            return Err(e);
        }

        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.request_timeout_ms);

        let outcome = tokio::select! {
            result = rx => result.ok(),
            () = tokio::time::sleep(timeout) => None,
        };

        self.waiters.lock().await.remove(&req_id);
        *self.lifecycle.write().await = WorkerLifecycle::Idle;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.counters
            .total_response_time_ms
            .fetch_add(elapsed_ms, Ordering::SeqCst);

        let result = match outcome {
            Some(WorkerMessage::Response { res, .. }) => Ok(res),
            Some(WorkerMessage::Error { error, .. }) => {
                self.counters.error_count.fetch_add(1, Ordering::SeqCst);
                Err(Error::Worker(WorkerError::Request(error)))
            }
            Some(_) | None if self.has_critical_error.load(Ordering::SeqCst) => {
                self.counters.error_count.fetch_add(1, Ordering::SeqCst);
                Err(Error::Worker(WorkerError::Critical(
                    self.ready_failed
                        .read()
                        .await
                        .clone()
                        .unwrap_or_else(|| "worker initialization failed".into()),
                )))
            }
            _ => Err(Error::Timeout {
                kind: TimeoutKind::WorkerRequest,
                elapsed_ms,
            }),
        };

        if self.config.ttl_ms == 0 {
            let this_id = self.id;
            tracing::debug!(worker_id = %this_id, "ephemeral worker completed its one request");
        }

        result
    }

    async fn write_frame(&self, msg: &WorkerMessage) -> Result<()> {
        let mut stdin_guard = self.stdin.lock().await;
        let stdin = stdin_guard
            .as_mut()
            .ok_or_else(|| Error::Worker(WorkerError::Critical("worker stdin closed".into())))?;
        let mut line = serde_json::to_vec(msg).map_err(|e| Error::Internal(e.to_string()))?;
        line.push(b'\n');
        stdin.write_all(&line).await.map_err(Error::Io)?;
        Ok(())
    }

    /// Send the edge-triggered `IDLE` notification at most once per idle
    /// transition (§3 `hasIdleBeenSent`).
    pub async fn notify_idle_once(&self) {
        if self
            .has_idle_been_sent
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.write_frame(&WorkerMessage::Idle).await;
        }
    }

    pub fn clear_idle_latch(&self) {
        self.has_idle_been_sent.store(false, Ordering::SeqCst);
    }

    /// Terminate the worker process. Idempotent: repeated calls are no-ops
    /// after the first (§4.2).
    pub async fn terminate(&self) {
        if self
            .terminated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        *self.lifecycle.write().await = WorkerLifecycle::Terminated;
        let _ = self.write_frame(&WorkerMessage::Terminate).await;
        tokio::time::sleep(Duration::from_millis(TERMINATE_DELAY_MS)).await;

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        // Fail any waiters still in flight.
        let mut waiters = self.waiters.lock().await;
        for (_, tx) in waiters.drain() {
            let _ = tx.send(WorkerMessage::Error {
                req_id: None,
                error: "worker terminated".into(),
                stack: None,
            });
        }

        tracing::info!(worker_id = %self.id, key = %self.key, "worker terminated");
    }
}

/// Encode bytes to the base64 body representation used on the wire.
pub fn encode_body(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a wire body back to bytes.
pub fn decode_body(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_sensitive_keys_by_pattern() {
        let mut env = HashMap::new();
        env.insert("DATABASE_URL".to_string(), "postgres://x".to_string());
        env.insert("API_KEY".to_string(), "abc".to_string());
        env.insert("GITHUB_TOKEN".to_string(), "ghp_x".to_string());
        env.insert("STRIPE_SECRET_KEY".to_string(), "sk_x".to_string());
        env.insert("PLAIN_VALUE".to_string(), "kept".to_string());

        let (kept, blocked) = filter_sensitive_env(&env);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.get("PLAIN_VALUE"), Some(&"kept".to_string()));
        assert_eq!(blocked.len(), 4);
    }

    #[test]
    fn keeps_keys_that_only_partially_resemble_patterns() {
        let mut env = HashMap::new();
        env.insert("MY_TOKENIZER".to_string(), "value".to_string());
        let (kept, blocked) = filter_sensitive_env(&env);
        assert_eq!(kept.len(), 1);
        assert!(blocked.is_empty());
    }

    #[test]
    fn body_round_trips_through_base64() {
        let bytes = b"hello world";
        let encoded = encode_body(bytes);
        let decoded = decode_body(&encoded).unwrap();
        assert_eq!(decoded, bytes);
    }
}
