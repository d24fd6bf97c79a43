//! # runtime-core
//!
//! Multi-tenant application runtime: an identity-keyed worker pool that
//! spawns and supervises per-tenant worker processes, a plugin loader and
//! registry that fans request/response hooks out across loaded plugins, and
//! a HRANA-compatible pipelined database protocol server, all glued together
//! by a single request pipeline.
//!
//! ## Example
//!
//! ```rust,no_run
//! use runtime_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Arc::new(Config::load()?);
//!
//!     let mut runtime = ActonApp::launch();
//!     let background = BackgroundWorker::spawn(&mut runtime).await?;
//!
//!     let pool = WorkerPool::new(config.pool.clone(), background.clone(), "http://127.0.0.1:0".to_string());
//!     let plugins = PluginRegistry::new(config.clone(), Some(pool.clone()));
//!
//!     let sessions = Arc::new(SessionManager::new(std::time::Duration::from_secs(config.hrana.session_idle_secs)));
//!     # struct NoAdapters;
//!     # #[async_trait]
//!     # impl AdapterResolver for NoAdapters {
//!     #     async fn get_adapter(&self, _: &str, _: &str) -> std::result::Result<Arc<dyn DatabaseAdapter>, runtime_core::hrana::AdapterError> { unimplemented!() }
//!     #     async fn get_root_adapter(&self, _: &str) -> std::result::Result<Arc<dyn DatabaseAdapter>, runtime_core::hrana::AdapterError> { unimplemented!() }
//!     # }
//!     let hrana = Arc::new(HranaServer::new(sessions, Arc::new(NoAdapters), None));
//!
//!     let state = Arc::new(AppState::new(config.clone(), pool, plugins, hrana, background));
//!     let app = build_router(state);
//!
//!     Server::new((*config).clone()).serve(app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod config;
pub mod error;
pub mod health;
pub mod hrana;
pub mod ids;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod plugin;
pub mod server;
pub mod state;
pub mod worker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{Config, HranaConfig, MiddlewareConfig, PluginsConfig, ServiceConfig, WorkerPoolConfig};
    pub use crate::error::{Error, HranaError, Result, TimeoutKind, WorkerError};
    pub use crate::health::{health, readiness};
    pub use crate::hrana::{AdapterResolver, DatabaseAdapter, HranaServer, Scalar, SessionManager};
    pub use crate::ids::{MakeTypedRequestId, RequestId, RequestIdError};
    pub use crate::metrics::RuntimeMetrics;
    pub use crate::middleware::{
        normalize_path, request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
        RequestTrackingConfig, PROPAGATE_HEADERS, SENSITIVE_HEADERS,
    };
    pub use crate::pipeline::build_router;
    pub use crate::plugin::{
        load_plugins, HookOutcome, Plugin, PluginContext, PluginFactory, PluginManifest, PluginRegistry,
        PluginRoute, RouteHandler, RuntimeMeta,
    };
    #[cfg(feature = "paseto-auth")]
    pub use crate::plugin::PasetoAuthPlugin;
    pub use crate::server::Server;
    pub use crate::state::AppState;
    pub use crate::worker::message::{WireRequest, WireResponse};
    pub use crate::worker::pool::{PoolMetrics, WorkerPool};

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};

    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};

    pub use tokio;

    pub use async_trait::async_trait;

    pub use thiserror::Error;
    pub use anyhow::{self, Context as AnyhowContext};

    pub use uuid::Uuid;

    pub use futures::{future, stream, Future, Stream, StreamExt, TryFutureExt, TryStreamExt};

    pub use http::{Method, Uri};

    pub use acton_reactive::prelude::*;
}
