//! Aggregated runtime metrics (§3 "Metrics state", §4.1 `getMetrics`).
//!
//! Grounded on the teacher's `pool_health.rs::PoolHealthSummary` pattern:
//! one `Serialize` snapshot struct composed from each subsystem's own
//! point-in-time view, consumable from a single health/metrics handler
//! without blocking any subsystem's hot path.

use serde::Serialize;

use crate::hrana::SessionManager;
use crate::plugin::PluginRegistry;
use crate::worker::pool::PoolMetrics;

/// Snapshot of the worker pool plus the plugin registry's size and the
/// HRANA session manager's live session count.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeMetrics {
    pub pool: PoolMetrics,
    pub plugins_loaded: usize,
    pub hrana_sessions_active: usize,
    pub healthy: bool,
}

impl RuntimeMetrics {
    pub fn snapshot(pool_metrics: PoolMetrics, plugins: &PluginRegistry, sessions: &SessionManager) -> Self {
        let plugins_loaded = plugins.count();
        let hrana_sessions_active = sessions.active_count();
        Self {
            healthy: true,
            pool: pool_metrics,
            plugins_loaded,
            hrana_sessions_active,
        }
    }
}
