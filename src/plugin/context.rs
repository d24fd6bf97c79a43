//! Plugin capability trait and the context handed to every hook (§4.3
//! "Build a `PluginContext`").

use async_trait::async_trait;
use axum::extract::ws::WebSocket;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::config::Config;
use crate::error::Result;
use crate::worker::pool::WorkerPool;
use crate::worker::message::{WireRequest, WireResponse};

use super::registry::PluginRegistry;

/// A plugin-provided static route handler (§4.3 "collecting plugin-provided
/// static routes", §4.3.1 auth-wrap). Boxed rather than generic so the
/// registry can hold handlers from different plugins in one map.
pub type RouteHandler = Arc<dyn Fn(WireRequest) -> BoxFuture<'static, Result<WireResponse>> + Send + Sync>;

/// One static route a plugin serves directly, outside the worker pool
/// (e.g. a plugin's own UI bundle or API surface).
#[derive(Clone)]
pub struct PluginRoute {
    /// Exact path this route answers, e.g. `/_plugins/kv/index.html`.
    pub path: String,
    pub handler: RouteHandler,
}

/// Runtime metadata exposed to plugins (§4.3 "(f) runtime metadata").
#[derive(Debug, Clone)]
pub struct RuntimeMeta {
    pub api_prefix: String,
    pub version: &'static str,
}

/// What `on_request` decided to do with a request.
pub enum HookOutcome {
    /// Continue the chain, possibly with a modified request.
    Continue(WireRequest),
    /// Short-circuit: later hooks and the worker dispatch are skipped.
    Respond(WireResponse),
}

/// The capability set a plugin may implement (§9 "Polymorphism over
/// variants" — expressed here as default no-op trait methods rather than a
/// struct of nullable function fields, since Rust's trait objects already
/// give us that shape for free).
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn on_init(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_request(&self, req: WireRequest, _ctx: &PluginContext) -> Result<HookOutcome> {
        Ok(HookOutcome::Continue(req))
    }

    async fn on_response(&self, res: WireResponse, _ctx: &PluginContext) -> Result<WireResponse> {
        Ok(res)
    }

    async fn on_shutdown(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_server_start(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_worker_spawn(&self, _key: &str, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_worker_terminate(&self, _key: &str, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Named capabilities this plugin exposes to others, registered with
    /// the registry's service map after `on_init` (§4.3 "provides()").
    async fn provides(&self, _ctx: &PluginContext) -> Result<HashMap<String, Arc<dyn Any + Send + Sync>>> {
        Ok(HashMap::new())
    }

    /// Static routes this plugin serves directly (its own UI bundle, a
    /// small API surface), collected after `provides()` and wrapped with
    /// the auth-wrap behavior of §4.3.1 before being mounted.
    async fn routes(&self, _ctx: &PluginContext) -> Result<Vec<PluginRoute>> {
        Ok(Vec::new())
    }

    /// Claim a WebSocket connection under this plugin's `base` (§4.3
    /// "WebSocket handler"). The registry forwards the whole upgraded
    /// socket to the single plugin whose base matched the request path —
    /// the "if only one plugin provides handlers, forward directly" case
    /// of §4.3's table, which is the only one this core implements; a
    /// plugin wanting open/message/close granularity demultiplexes frames
    /// itself once it owns the socket.
    async fn on_websocket(&self, _socket: WebSocket, _ctx: &PluginContext) {}
}

/// A factory constructs a plugin instance from its merged manifest options
/// (manifest fields minus reserved metadata). This is the Rust stand-in for
/// the source's "import the module lazily, then call its default export or
/// factory" step — there is no dynamic code loading here, so the loader
/// resolves a manifest's `name` to a factory registered ahead of time.
pub type PluginFactory = Arc<dyn Fn(HashMap<String, Value>) -> Result<Arc<dyn Plugin>> + Send + Sync>;

/// Context passed to every plugin hook.
///
/// Holds a weak back-pointer to the registry (§9 "Cyclic visibility":
/// plugins may look each other up, so the registry owns plugins by strong
/// reference and hands out weak references to itself to avoid a cycle).
pub struct PluginContext {
    pub plugin_name: String,
    pub options: HashMap<String, Value>,
    pub config: Arc<Config>,
    pub worker_pool: Option<Arc<WorkerPool>>,
    pub meta: RuntimeMeta,
    services: Arc<DashMap<String, Arc<dyn Any + Send + Sync>>>,
    registry: Weak<PluginRegistry>,
}

impl PluginContext {
    pub(super) fn new(
        plugin_name: String,
        options: HashMap<String, Value>,
        config: Arc<Config>,
        worker_pool: Option<Arc<WorkerPool>>,
        meta: RuntimeMeta,
        services: Arc<DashMap<String, Arc<dyn Any + Send + Sync>>>,
        registry: Weak<PluginRegistry>,
    ) -> Self {
        Self {
            plugin_name,
            options,
            config,
            worker_pool,
            meta,
            services,
            registry,
        }
    }

    /// Look up another plugin by name (§4.3 "(e) getPlugin").
    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.registry.upgrade()?.get(name)
    }

    /// Register a shared capability under `name`, callable by any plugin
    /// loaded after this one.
    pub fn register_service(&self, name: impl Into<String>, service: Arc<dyn Any + Send + Sync>) {
        self.services.insert(name.into(), service);
    }

    /// Fetch a previously registered service, downcast to `T`.
    pub fn get_service<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        let entry = self.services.get(name)?;
        entry.value().clone().downcast::<T>().ok()
    }
}
