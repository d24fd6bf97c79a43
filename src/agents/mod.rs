//! Agent-based components for runtime-core.
//!
//! Built on [`acton_reactive`], these agents offer reactive alternatives to
//! ad-hoc shared-state management:
//!
//! - **Health monitoring**: aggregated health view over the worker pool,
//!   plugin registry, and HRANA server via message passing.
//! - **Background task tracking**: named, cancellable background tasks
//!   (session sweepers, worker cleanup timers) with graceful shutdown.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use runtime_core::agents::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = ActonApp::launch();
//!     let health_monitor = HealthMonitorAgent::spawn(&mut runtime).await?;
//!     let background = BackgroundWorker::spawn(&mut runtime).await?;
//!     runtime.shutdown_all().await?;
//!     Ok(())
//! }
//! ```

pub mod background_worker;
mod health;
mod messages;

pub mod prelude {
    //! Convenient re-exports for agent-based components.

    pub use acton_reactive::prelude::*;

    pub use super::messages::{
        AggregatedHealthResponse, CancelTask, ComponentHealth, GetAggregatedHealth,
        GetAllTaskStatuses, GetTaskStatus, HealthStatus, PoolHealthUpdate, TaskStatusResponse,
    };

    pub use super::background_worker::{BackgroundWorker, BackgroundWorkerState, TaskStatus};
    pub use super::health::{HealthMonitorAgent, HealthMonitorState};
}

pub use messages::*;

pub use background_worker::{BackgroundWorker, BackgroundWorkerState, TaskStatus};
pub use health::{HealthMonitorAgent, HealthMonitorState};
