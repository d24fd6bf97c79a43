//! Worker pool: identity-keyed cache of worker processes (§3, §4.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use tokio::sync::RwLock;

use crate::agents::BackgroundWorker;
use crate::config::WorkerPoolConfig;
use crate::error::{Error, Result, WorkerError};
use crate::worker::instance::WorkerInstance;
use crate::worker::message::{WireRequest, WireResponse};
use crate::worker::stats::{compose_worker_stats, BoundedStatsMap, EphemeralSessionStats, WorkerStats};

static SEMVER_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+").expect("fixed semver-prefix pattern"));

/// Point-in-time, non-blocking snapshot returned by `getMetrics` (§4.1).
#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct PoolMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub workers_created: u64,
    pub workers_failed: u64,
    pub workers_retired: u64,
    pub live_worker_count: usize,
}

#[derive(Default)]
struct MetricsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    workers_created: AtomicU64,
    workers_failed: AtomicU64,
    workers_retired: AtomicU64,
}

/// Resolve the application key from its directory path, per §4.1
/// "Resolution of the application key".
///
/// `manifest_version` is the `version` field read from the directory's
/// `package.json` (or equivalent), if present — it overrides the
/// folder-derived version.
pub fn resolve_app_key(app_dir: &str, manifest_version: Option<&str>) -> String {
    let trimmed = app_dir.trim_end_matches('/');
    let segments: Vec<&str> = trimmed.rsplitn(3, '/').collect();
    // rsplitn(3, ..) gives segments in reverse order: [last, second_to_last, rest...]
    let last = segments.first().copied().unwrap_or("");
    let second_to_last = segments.get(1).copied().unwrap_or("");

    let (name, folder_version) = if SEMVER_SEGMENT.is_match(second_to_last)
        || SEMVER_SEGMENT.is_match(last)
    {
        // Nested layout: <name>/<version>
        if SEMVER_SEGMENT.is_match(last) {
            (second_to_last.to_string(), last.to_string())
        } else {
            (last.to_string(), second_to_last.to_string())
        }
    } else {
        // "name@version" layout, default version "latest".
        match last.split_once('@') {
            Some((name, version)) => (name.to_string(), version.to_string()),
            None => (last.to_string(), "latest".to_string()),
        }
    };

    let version = manifest_version
        .map(str::to_string)
        .unwrap_or(folder_version);
    format!("{name}@{version}")
}

/// Identity-keyed cache of worker processes with TTL/idle/request-count/
/// health-based eviction (§3, §4.1).
pub struct WorkerPool {
    config: WorkerPoolConfig,
    workers: Arc<DashMap<String, Arc<WorkerInstance>>>,
    worker_dirs: Arc<DashMap<String, String>>,
    historical: Arc<RwLock<BoundedStatsMap<WorkerStats>>>,
    ephemeral: RwLock<BoundedStatsMap<EphemeralSessionStats>>,
    metrics: Arc<MetricsCounters>,
    background: BackgroundWorker,
    loopback_api_url: String,
    /// Set right after construction so the cleanup task spawned by
    /// `schedule_cleanup` can retire a worker through the same code path as
    /// every other caller, without holding a second owned copy of `self`.
    self_ref: OnceCell<Weak<WorkerPool>>,
}

impl WorkerPool {
    /// Construct a pool. Returns an `Arc` because the cleanup timers spawned
    /// per worker key need a weak handle back to the pool that outlives the
    /// call that created them.
    pub fn new(config: WorkerPoolConfig, background: BackgroundWorker, loopback_api_url: String) -> Arc<Self> {
        let bound = config.stats_bound;
        let pool = Arc::new(Self {
            config,
            workers: Arc::new(DashMap::new()),
            worker_dirs: Arc::new(DashMap::new()),
            historical: Arc::new(RwLock::new(BoundedStatsMap::new(bound))),
            ephemeral: RwLock::new(BoundedStatsMap::new(bound)),
            metrics: Arc::new(MetricsCounters::default()),
            background,
            loopback_api_url,
            self_ref: OnceCell::new(),
        });
        let _ = pool.self_ref.set(Arc::downgrade(&pool));
        pool
    }

    /// `fetch(appDir, workerConfig, request, ...) -> response` (§4.1).
    #[tracing::instrument(skip(self, req, env), fields(app_dir = %app_dir))]
    pub async fn fetch(
        &self,
        app_dir: &str,
        manifest_version: Option<&str>,
        env: HashMap<String, String>,
        req: WireRequest,
    ) -> Result<WireResponse> {
        let key = resolve_app_key(app_dir, manifest_version);

        if let Some(existing_dir) = self.worker_dirs.get(&key) {
            if existing_dir.value() != app_dir {
                return Err(Error::Worker(WorkerError::Collision {
                    key,
                    existing_dir: existing_dir.value().clone(),
                    requested_dir: app_dir.to_string(),
                }));
            }
        }

        if self.config.ttl_ms == 0 {
            return self.fetch_ephemeral(&key, app_dir, env, req).await;
        }
        self.fetch_persistent(&key, app_dir, env, req).await
    }

    async fn fetch_persistent(
        &self,
        key: &str,
        app_dir: &str,
        env: HashMap<String, String>,
        req: WireRequest,
    ) -> Result<WireResponse> {
        if let Some(existing) = self.workers.get(key).map(|r| Arc::clone(r.value())) {
            if existing.is_healthy().await {
                self.metrics.hits.fetch_add(1, Ordering::SeqCst);
                existing.touch().await;
                return existing.fetch(req).await;
            }
        }
        // Stale or absent: drop it and construct anew.
        if let Some((_, stale)) = self.workers.remove(key) {
            stale.terminate().await;
        }
        self.metrics.misses.fetch_add(1, Ordering::SeqCst);

        let instance = match WorkerInstance::spawn(
            key.to_string(),
            app_dir,
            self.config.clone(),
            env,
            &self.loopback_api_url,
        )
        .await
        {
            Ok(instance) => instance,
            Err(e) => {
                self.metrics.workers_failed.fetch_add(1, Ordering::SeqCst);
                return Err(e);
            }
        };
        self.metrics.workers_created.fetch_add(1, Ordering::SeqCst);

        self.insert_with_eviction(key.to_string(), Arc::clone(&instance)).await;
        self.worker_dirs.insert(key.to_string(), app_dir.to_string());
        self.schedule_cleanup(key.to_string()).await;

        instance.fetch(req).await
    }

    async fn fetch_ephemeral(
        &self,
        key: &str,
        app_dir: &str,
        env: HashMap<String, String>,
        req: WireRequest,
    ) -> Result<WireResponse> {
        self.metrics.misses.fetch_add(1, Ordering::SeqCst);
        let is_document = req
            .headers
            .get("sec-fetch-dest")
            .map(|v| v == "document")
            .unwrap_or(false);
        let is_api = req
            .headers
            .get("sec-fetch-dest")
            .map(|v| v == "empty")
            .unwrap_or(true);

        let instance = match WorkerInstance::spawn(
            key.to_string(),
            app_dir,
            self.config.clone(),
            env,
            &self.loopback_api_url,
        )
        .await
        {
            Ok(instance) => instance,
            Err(e) => {
                self.metrics.workers_failed.fetch_add(1, Ordering::SeqCst);
                return Err(e);
            }
        };
        self.metrics.workers_created.fetch_add(1, Ordering::SeqCst);

        let result = instance.fetch(req).await;
        let instance_stats = instance.stats();
        instance.terminate().await;

        let mut ephemeral = self.ephemeral.write().await;
        if is_document || is_api || ephemeral.get(key).is_none() {
            ephemeral.insert(
                key.to_string(),
                EphemeralSessionStats {
                    last_request_count: instance_stats.request_count,
                    last_response_time_ms: instance_stats.total_response_time_ms,
                },
            );
        } else if let Some(session) = ephemeral.get_mut(key) {
            session.last_request_count += instance_stats.request_count;
            session.last_response_time_ms += instance_stats.total_response_time_ms;
        }

        result
    }

    async fn insert_with_eviction(&self, key: String, instance: Arc<WorkerInstance>) {
        if self.workers.len() >= self.config.max_size && !self.workers.contains_key(&key) {
            if let Some(lru_key) = self.find_lru_key().await {
                self.retire(&lru_key, /* record_eviction */ true).await;
            }
        }
        self.workers.insert(key, instance);
    }

    async fn find_lru_key(&self) -> Option<String> {
        // Unhealthy workers are evicted before healthy ones; among equals,
        // the one idle longest goes first.
        let mut unhealthy: Option<String> = None;
        let mut oldest: Option<(String, u64)> = None;

        let candidates: Vec<(String, Arc<WorkerInstance>)> = self
            .workers
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        for (key, instance) in candidates {
            if !instance.is_healthy().await {
                unhealthy = Some(key);
                break;
            }
            let idle = instance.idle_ms().await;
            if oldest.as_ref().map(|(_, o)| idle > *o).unwrap_or(true) {
                oldest = Some((key, idle));
            }
        }

        unhealthy.or_else(|| oldest.map(|(k, _)| k))
    }

    async fn schedule_cleanup(&self, key: String) {
        let period_ms = (self.config.idle_timeout_ms.min(self.config.ttl_ms.max(1))) / 2;
        let period = std::time::Duration::from_millis(period_ms.max(1000));
        let workers = self.workers.clone();
        let pool_ref = self
            .self_ref
            .get()
            .cloned()
            .expect("self_ref is set by WorkerPool::new before any caller can reach schedule_cleanup");
        let task_key = key.clone();

        self.background
            .submit(format!("worker-cleanup:{key}"), move || {
                let workers = workers;
                let key = task_key;
                async move {
                    loop {
                        tokio::time::sleep(period).await;
                        let instance = match workers.get(&key).map(|r| Arc::clone(r.value())) {
                            Some(instance) => instance,
                            None => return Ok::<(), anyhow::Error>(()),
                        };

                        if instance.is_idle_expired().await {
                            instance.notify_idle_once().await;
                        }

                        if !instance.is_healthy().await {
                            if let Some(pool) = pool_ref.upgrade() {
                                // `retire_from_self` skips the cancel of this very
                                // task — it is already exiting, so there's nothing
                                // to cancel.
                                pool.retire_from_self(&key).await;
                            }
                            return Ok(());
                        }
                    }
                }
            })
            .await;
    }

    /// Retire a worker: accumulate historical stats, terminate, remove
    /// from cache and directory map, per §4.1.
    async fn retire(&self, key: &str, record_eviction: bool) {
        self.retire_inner(key, record_eviction).await;
        self.background.cancel(format!("worker-cleanup:{key}")).await;
    }

    /// Same as [`Self::retire`], but called from within a worker's own
    /// cleanup task. Cancelling that task's own background-worker entry here
    /// would await the task's own join handle from inside itself, so the
    /// task's natural return-to-`Completed` transition is left to do that
    /// bookkeeping instead.
    async fn retire_from_self(&self, key: &str) {
        self.retire_inner(key, false).await;
    }

    async fn retire_inner(&self, key: &str, record_eviction: bool) {
        if let Some((_, instance)) = self.workers.remove(key) {
            let stats = instance.stats();
            instance.terminate().await;
            self.metrics.workers_retired.fetch_add(1, Ordering::SeqCst);
            if record_eviction {
                self.metrics.evictions.fetch_add(1, Ordering::SeqCst);
            }

            let mut historical = self.historical.write().await;
            if let Some(existing) = historical.get_mut(key) {
                existing.request_count += stats.request_count;
                existing.error_count += stats.error_count;
                existing.total_response_time_ms += stats.total_response_time_ms;
            } else {
                historical.insert(key.to_string(), stats);
            }
        }
        self.worker_dirs.remove(key);
    }

    /// Sweep all cached workers and retire any that have gone unhealthy.
    /// Intended to be driven by the background cleanup tasks, but callable
    /// directly (e.g. from tests or an explicit health-check endpoint).
    pub async fn sweep_unhealthy(&self) {
        let candidates: Vec<(String, Arc<WorkerInstance>)> = self
            .workers
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut stale = Vec::new();
        for (key, instance) in candidates {
            if !instance.is_healthy().await {
                stale.push(key);
            }
        }
        for key in stale {
            self.retire(&key, false).await;
        }
    }

    /// `getMetrics() -> PoolMetrics` — never blocks pool operations (§4.1).
    pub fn get_metrics(&self) -> PoolMetrics {
        PoolMetrics {
            hits: self.metrics.hits.load(Ordering::SeqCst),
            misses: self.metrics.misses.load(Ordering::SeqCst),
            evictions: self.metrics.evictions.load(Ordering::SeqCst),
            workers_created: self.metrics.workers_created.load(Ordering::SeqCst),
            workers_failed: self.metrics.workers_failed.load(Ordering::SeqCst),
            workers_retired: self.metrics.workers_retired.load(Ordering::SeqCst),
            live_worker_count: self.workers.len(),
        }
    }

    /// `getWorkerStats() -> map<key, WorkerStats>` (§4.1).
    pub async fn get_worker_stats(&self) -> HashMap<String, WorkerStats> {
        let historical = self.historical.read().await;
        let ephemeral = self.ephemeral.read().await;
        let mut ephemeral_as_stats = BoundedStatsMap::new(ephemeral.len().max(1));
        for (key, session) in ephemeral.iter() {
            ephemeral_as_stats.insert(
                key.clone(),
                WorkerStats {
                    status: crate::worker::stats::WorkerStatus::Offline,
                    request_count: session.last_request_count,
                    error_count: 0,
                    total_response_time_ms: session.last_response_time_ms,
                },
            );
        }

        let mut live = HashMap::new();
        for entry in self.workers.iter() {
            live.insert(entry.key().clone(), entry.value().stats());
        }

        compose_worker_stats(&historical, &ephemeral_as_stats, &live)
    }

    /// `shutdown()` — retire all workers, stop all timers (§4.1).
    pub async fn shutdown(&self) {
        let keys: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.retire(&key, false).await;
        }
        tracing::info!("worker pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_name_at_version_layout_with_default_latest() {
        assert_eq!(resolve_app_key("/apps/hello", None), "hello@latest");
    }

    #[test]
    fn resolves_name_at_version_layout_with_explicit_version() {
        assert_eq!(resolve_app_key("/apps/hello@1.0.0", None), "hello@1.0.0");
    }

    #[test]
    fn resolves_nested_name_version_layout() {
        assert_eq!(resolve_app_key("/apps/hello/2.3.4", None), "hello@2.3.4");
    }

    #[test]
    fn manifest_version_overrides_folder_derived_version() {
        assert_eq!(
            resolve_app_key("/apps/hello@1.0.0", Some("2.0.0")),
            "hello@2.0.0"
        );
    }
}
