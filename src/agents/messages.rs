//! Agent message types.
//!
//! These messages define the communication protocol between the
//! [`super::health::HealthMonitorAgent`], the components that report into it
//! (worker pool, plugin registry, HRANA server), and
//! [`super::background_worker::BackgroundWorker`].
//!
//! All messages derive `Clone` and `Debug` to satisfy the `ActonMessage`
//! trait requirements via blanket implementation.

/// Health status of a monitored component.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum HealthStatus {
    /// Component is healthy and operational.
    Healthy,
    /// Component is degraded but operational.
    Degraded,
    /// Component is unhealthy.
    #[default]
    Unhealthy,
    /// Component is still starting up.
    Connecting,
}

/// Broadcast sent by a component whenever its health changes.
#[derive(Clone, Debug, Default)]
pub struct PoolHealthUpdate {
    /// Component name, e.g. `"worker_pool"`, `"plugin_registry"`, `"hrana"`.
    pub pool_type: String,
    pub status: HealthStatus,
    pub message: String,
}

/// Query for the current aggregated health view.
#[derive(Clone, Debug, Default)]
pub struct GetAggregatedHealth;

/// Response containing aggregated health status from all components.
#[derive(Clone, Debug, Default)]
pub struct AggregatedHealthResponse {
    /// Overall health status (unhealthy if any component is unhealthy).
    pub overall_healthy: bool,
    pub components: Vec<ComponentHealth>,
}

/// Health status of a single component.
#[derive(Clone, Debug, Default)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

// =============================================================================
// Background Worker Agent messages
// =============================================================================

/// Message to cancel a running background task.
#[derive(Clone, Debug, Default)]
pub struct CancelTask {
    pub task_id: String,
}

/// Message to query the status of a specific task.
#[derive(Clone, Debug, Default)]
pub struct GetTaskStatus {
    pub task_id: String,
}

/// Message to query the status of all tasks.
#[derive(Clone, Debug, Default)]
pub struct GetAllTaskStatuses;

/// Response containing task status information.
#[derive(Clone, Debug, Default)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: super::background_worker::TaskStatus,
}
