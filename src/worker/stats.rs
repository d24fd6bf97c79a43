//! Per-worker statistics (§3 "Metrics state", §4.1 `getWorkerStats`).
//!
//! `getWorkerStats` composes three sources in increasing priority —
//! historical (offline) ⊕ ephemeral ⊕ live — where a later source
//! overwrites an earlier one for the same key, except that live counters
//! are *added* to whatever historical counters already exist for that key
//! (the source is a worker that lived before, evicted, and came back).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a worker key as seen by `getWorkerStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerStatus {
    /// A worker is currently live in the pool for this key.
    Online,
    /// No live worker; the key's counters are historical only.
    Offline,
}

/// Cumulative counters for one application key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    pub status: WorkerStatus,
    pub request_count: u64,
    pub error_count: u64,
    pub total_response_time_ms: u64,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        WorkerStatus::Offline
    }
}

impl WorkerStats {
    fn merge_counters(&mut self, other: &WorkerStats) {
        self.request_count += other.request_count;
        self.error_count += other.error_count;
        self.total_response_time_ms += other.total_response_time_ms;
    }
}

/// Ephemeral-session counters, keyed the same as persistent workers but
/// representing a `Sec-Fetch-Dest`-delimited browsing session (§4.1
/// "Ephemeral mode").
#[derive(Debug, Clone, Default)]
pub struct EphemeralSessionStats {
    pub last_request_count: u64,
    pub last_response_time_ms: u64,
}

/// Bounded map that evicts oldest-by-insertion once it reaches `bound`
/// entries (§5 "Backpressure": historical/ephemeral maps max at 1000).
#[derive(Debug)]
pub struct BoundedStatsMap<V> {
    bound: usize,
    order: Vec<String>,
    entries: HashMap<String, V>,
}

impl<V> BoundedStatsMap<V> {
    pub fn new(bound: usize) -> Self {
        Self {
            bound,
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn insert(&mut self, key: String, value: V) {
        if !self.entries.contains_key(&key) {
            if self.order.len() >= self.bound {
                let oldest = self.order.remove(0);
                self.entries.remove(&oldest);
            }
            self.order.push(key.clone());
        }
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }
}

/// Compose `getWorkerStats` per §4.1: historical ⊕ ephemeral ⊕ live, later
/// sources overwrite earlier ones, live counters add onto historical ones
/// for the same key.
pub fn compose_worker_stats(
    historical: &BoundedStatsMap<WorkerStats>,
    ephemeral: &BoundedStatsMap<WorkerStats>,
    live: &HashMap<String, WorkerStats>,
) -> HashMap<String, WorkerStats> {
    let mut out: HashMap<String, WorkerStats> = HashMap::new();

    for (key, stats) in historical.iter() {
        let mut s = stats.clone();
        s.status = WorkerStatus::Offline;
        out.insert(key.clone(), s);
    }

    for (key, stats) in ephemeral.iter() {
        let mut s = stats.clone();
        s.status = WorkerStatus::Offline;
        out.insert(key.clone(), s);
    }

    for (key, stats) in live {
        let mut s = stats.clone();
        s.status = WorkerStatus::Online;
        if let Some(existing) = out.get(key) {
            let mut merged = existing.clone();
            merged.merge_counters(&s);
            merged.status = WorkerStatus::Online;
            out.insert(key.clone(), merged);
        } else {
            out.insert(key.clone(), s);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_map_evicts_oldest_by_insertion() {
        let mut map = BoundedStatsMap::new(2);
        map.insert("a".into(), WorkerStats::default());
        map.insert("b".into(), WorkerStats::default());
        map.insert("c".into(), WorkerStats::default());
        assert_eq!(map.len(), 2);
        assert!(map.get("a").is_none());
        assert!(map.get("b").is_some());
        assert!(map.get("c").is_some());
    }

    #[test]
    fn compose_merges_live_onto_historical_counters() {
        let mut historical = BoundedStatsMap::new(1000);
        historical.insert(
            "hello@1.0.0".into(),
            WorkerStats {
                status: WorkerStatus::Offline,
                request_count: 5,
                error_count: 1,
                total_response_time_ms: 500,
            },
        );
        let ephemeral = BoundedStatsMap::new(1000);
        let mut live = HashMap::new();
        live.insert(
            "hello@1.0.0".into(),
            WorkerStats {
                status: WorkerStatus::Online,
                request_count: 2,
                error_count: 0,
                total_response_time_ms: 120,
            },
        );

        let composed = compose_worker_stats(&historical, &ephemeral, &live);
        let s = composed.get("hello@1.0.0").unwrap();
        assert_eq!(s.status, WorkerStatus::Online);
        assert_eq!(s.request_count, 7);
        assert_eq!(s.total_response_time_ms, 620);
    }

    #[test]
    fn compose_reports_offline_status_for_evicted_only_keys() {
        let mut historical = BoundedStatsMap::new(1000);
        historical.insert("evicted@1.0.0".into(), WorkerStats::default());
        let ephemeral = BoundedStatsMap::new(1000);
        let live = HashMap::new();

        let composed = compose_worker_stats(&historical, &ephemeral, &live);
        assert_eq!(composed.get("evicted@1.0.0").unwrap().status, WorkerStatus::Offline);
    }
}
