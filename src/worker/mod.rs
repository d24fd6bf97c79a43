//! Worker pool and worker-process supervision (§3, §4.1, §4.2, §6).
//!
//! A [`pool::WorkerPool`] owns a cache of [`instance::WorkerInstance`]
//! processes keyed by application identity, spawning, health-checking, and
//! retiring them according to the TTL/idle/request-count/health rules in
//! §4.1. Each instance speaks the newline-delimited JSON protocol in
//! [`message`] over its stdio pipes.

pub mod instance;
pub mod message;
pub mod pool;
pub mod stats;

pub use instance::{filter_sensitive_env, WorkerInstance, WorkerLifecycle};
pub use message::{WireRequest, WireResponse, WorkerMessage};
pub use pool::{resolve_app_key, PoolMetrics, WorkerPool};
pub use stats::{compose_worker_stats, BoundedStatsMap, EphemeralSessionStats, WorkerStats, WorkerStatus};
