//! Health check handlers.
//!
//! Liveness is a trivial "process is up" check; readiness additionally
//! reports the worker pool, plugin registry, and HRANA session manager's
//! own view of themselves, aggregated through the `HealthMonitorAgent`
//! when one is attached to `AppState` and falling back to a direct,
//! synchronous check otherwise.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::agents::{AggregatedHealthResponse, GetAggregatedHealth};
use crate::state::AppState;

/// Health check response (liveness).
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Readiness check response with dependency status.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub service: String,
    pub dependencies: HashMap<String, DependencyStatus>,
}

/// Individual dependency status.
#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Simple health check (liveness probe). Always `200 OK` if the process is
/// answering requests at all.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config().service.name.clone(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness check (readiness probe): reports the worker pool's live
/// worker count, the plugin registry's load status, and the HRANA session
/// manager's liveness. Returns `503` only if the worker pool has no
/// capacity to accept new workers at all (`max_size == 0`), since an
/// otherwise-empty pool is a normal idle state, not a failure.
pub async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut dependencies = HashMap::new();
    let mut ready = true;

    if let Some(handle) = state.health_monitor() {
        match handle
            .clone()
            .send_and_wait::<GetAggregatedHealth, AggregatedHealthResponse>()
            .await
        {
            Ok(aggregated) => {
                ready = aggregated.overall_healthy;
                for component in aggregated.components {
                    dependencies.insert(
                        component.name,
                        DependencyStatus {
                            healthy: component.status == crate::agents::HealthStatus::Healthy,
                            message: Some(component.message),
                        },
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "health monitor query failed, falling back to direct checks");
            }
        }
    }

    let pool_metrics = state.pool().get_metrics();
    let pool_capacity_ok = state.config().pool.max_size > 0;
    if !pool_capacity_ok {
        ready = false;
    }
    dependencies.entry("worker_pool".to_string()).or_insert(DependencyStatus {
        healthy: pool_capacity_ok,
        message: Some(format!("{} live workers", pool_metrics.live_worker_count)),
    });

    dependencies
        .entry("plugin_registry".to_string())
        .or_insert(DependencyStatus {
            healthy: true,
            message: Some(format!("{} plugins loaded", state.plugins().count())),
        });

    dependencies
        .entry("hrana".to_string())
        .or_insert(DependencyStatus {
            healthy: true,
            message: Some(format!("{} active sessions", state.hrana().sessions().active_count())),
        });

    let response = ReadinessResponse {
        ready,
        service: state.config().service.name.clone(),
        dependencies,
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Aggregated runtime metrics (§3 "Metrics state", §4.1 `getMetrics`).
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics_snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            service: "test-service".to_string(),
            version: Some("1.0.0".to_string()),
        };

        assert_eq!(response.status, "healthy");
        assert_eq!(response.service, "test-service");
    }

    #[test]
    fn test_dependency_status() {
        let status = DependencyStatus {
            healthy: true,
            message: Some("OK".to_string()),
        };

        assert!(status.healthy);
        assert_eq!(status.message, Some("OK".to_string()));
    }
}
