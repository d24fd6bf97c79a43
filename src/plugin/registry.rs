//! Plugin registry (§4.3 "Registry responsibilities").
//!
//! Holds plugins by strong reference in registration order; append-only
//! once loading completes (§5 "Shared-resource policy": "the plugin
//! registry is append-only after load completes").

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::Value;

use crate::config::Config;
use crate::error::{Error, PluginError, Result};
use crate::worker::message::{WireRequest, WireResponse};
use crate::worker::pool::WorkerPool;

use super::context::{HookOutcome, Plugin, PluginContext, PluginRoute, RouteHandler, RuntimeMeta};

struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    dir: PathBuf,
    base: Option<String>,
}

/// Ordered, name-addressable collection of loaded plugins plus the hook
/// fan-out behaviors described in §4.3's responsibilities table.
pub struct PluginRegistry {
    order: RwLock<Vec<String>>,
    by_name: RwLock<HashMap<String, RegisteredPlugin>>,
    config: Arc<Config>,
    worker_pool: Option<Arc<WorkerPool>>,
    meta: RuntimeMeta,
    services: Arc<DashMap<String, Arc<dyn Any + Send + Sync>>>,
    /// Plugin-provided static routes, keyed by exact path (§4.3 "collecting
    /// plugin-provided static routes"), alongside the name of the plugin
    /// that owns each one so its context can be rebuilt for the auth-wrap.
    routes: DashMap<String, (String, RouteHandler)>,
}

impl PluginRegistry {
    pub fn new(config: Arc<Config>, worker_pool: Option<Arc<WorkerPool>>) -> Arc<Self> {
        let meta = RuntimeMeta {
            api_prefix: config.plugins.api_prefix.clone(),
            version: env!("CARGO_PKG_VERSION"),
        };
        Arc::new(Self {
            order: RwLock::new(Vec::new()),
            by_name: RwLock::new(HashMap::new()),
            config,
            worker_pool,
            meta,
            services: Arc::new(DashMap::new()),
            routes: DashMap::new(),
        })
    }

    /// Build a [`PluginContext`] for `name` carrying the registry's shared
    /// config/worker-pool/services, for use outside the load phase (request
    /// pipeline hook fan-out, where a plugin's manifest options are no
    /// longer needed — it captured them during `on_init`).
    pub fn context_for(self: &Arc<Self>, name: &str) -> PluginContext {
        self.build_context(name, HashMap::new())
    }

    pub(super) fn services(&self) -> &Arc<DashMap<String, Arc<dyn Any + Send + Sync>>> {
        &self.services
    }

    pub(super) fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub(super) fn build_context(self: &Arc<Self>, name: &str, options: HashMap<String, Value>) -> PluginContext {
        PluginContext::new(
            name.to_string(),
            options,
            self.config.clone(),
            self.worker_pool.clone(),
            self.meta.clone(),
            self.services.clone(),
            Arc::downgrade(self),
        )
    }

    /// `register(plugin, dir, base)` — fails if the name is already
    /// present. `base` is the plugin's validated mount path, if it has one.
    pub fn register(&self, plugin: Arc<dyn Plugin>, dir: PathBuf, base: Option<String>) -> Result<()> {
        let name = plugin.name().to_string();
        let mut by_name = self.by_name.write().expect("registry lock poisoned");
        if by_name.contains_key(&name) {
            return Err(Error::Plugin(PluginError::DuplicateName(name)));
        }
        by_name.insert(name.clone(), RegisteredPlugin { plugin, dir, base });
        self.order.write().expect("registry lock poisoned").push(name);
        Ok(())
    }

    /// Number of currently registered plugins.
    pub fn count(&self) -> usize {
        self.order.read().expect("registry lock poisoned").len()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.by_name
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .map(|r| r.plugin.clone())
    }

    fn snapshot_order(&self) -> Vec<Arc<dyn Plugin>> {
        let order = self.order.read().expect("registry lock poisoned");
        let by_name = self.by_name.read().expect("registry lock poisoned");
        order
            .iter()
            .filter_map(|name| by_name.get(name).map(|r| r.plugin.clone()))
            .collect()
    }

    /// Mount the static routes a plugin returned from `routes()` during
    /// load (§4.3). Later plugins may not steal an earlier plugin's path.
    pub(super) fn register_routes(&self, plugin_name: &str, routes: Vec<PluginRoute>) {
        for route in routes {
            if self.routes.contains_key(&route.path) {
                tracing::warn!(plugin = plugin_name, path = %route.path, "route path already claimed, ignoring");
                continue;
            }
            self.routes.insert(route.path, (plugin_name.to_string(), route.handler));
        }
    }

    /// Look up the plugin-owning name and handler for an exact path match.
    pub fn route_handler(&self, path: &str) -> Option<(String, RouteHandler)> {
        self.routes.get(path).map(|e| e.value().clone())
    }

    pub fn dir_of(&self, name: &str) -> Option<PathBuf> {
        self.by_name
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .map(|r| r.dir.clone())
    }

    /// `resolvePluginApp(pathname)` — the plugin whose registered `base` is
    /// a prefix of `pathname` (exact match, or `pathname` starts with
    /// `base + "/"`).
    pub fn resolve_plugin_app(&self, pathname: &str) -> Option<Arc<dyn Plugin>> {
        let order = self.order.read().expect("registry lock poisoned");
        let by_name = self.by_name.read().expect("registry lock poisoned");
        for name in order.iter() {
            let Some(registered) = by_name.get(name) else { continue };
            let Some(base) = &registered.base else { continue };
            if pathname == base || pathname.starts_with(&format!("{base}/")) {
                return Some(registered.plugin.clone());
            }
        }
        None
    }

    /// `runOnRequest(req, app?)` — iterate in registration order; a hook
    /// returning a response short-circuits; a hook that errors is logged
    /// and the next hook sees the unmodified request.
    pub async fn run_on_request(&self, req: WireRequest, ctx_for: impl Fn(&str) -> PluginContext) -> Result<HookOutcome> {
        let mut current = req;
        for plugin in self.snapshot_order() {
            let ctx = ctx_for(plugin.name());
            match plugin.on_request(current.clone(), &ctx).await {
                Ok(HookOutcome::Continue(modified)) => current = modified,
                Ok(HookOutcome::Respond(response)) => return Ok(HookOutcome::Respond(response)),
                Err(e) => {
                    tracing::error!(plugin = plugin.name(), error = %e, "onRequest hook failed, continuing with unmodified request");
                }
            }
        }
        Ok(HookOutcome::Continue(current))
    }

    /// Like [`Self::run_on_request`], but used for plugin-provided static
    /// routes (§4.3.1): any thrown hook error denies the request outright
    /// instead of being logged-and-skipped.
    pub async fn run_on_request_auth_wrap(
        &self,
        req: WireRequest,
        ctx_for: impl Fn(&str) -> PluginContext,
    ) -> Result<HookOutcome> {
        let mut current = req;
        for plugin in self.snapshot_order() {
            let ctx = ctx_for(plugin.name());
            match plugin.on_request(current.clone(), &ctx).await {
                Ok(HookOutcome::Continue(modified)) => current = modified,
                Ok(HookOutcome::Respond(response)) => return Ok(HookOutcome::Respond(response)),
                Err(e) => {
                    tracing::warn!(plugin = plugin.name(), error = %e, "onRequest hook threw on an auth-wrapped route, denying");
                    return Ok(HookOutcome::Respond(WireResponse {
                        status: 401,
                        headers: HashMap::new(),
                        body: Some(crate::worker::instance::encode_body(b"Unauthorized")),
                    }));
                }
            }
        }
        Ok(HookOutcome::Continue(current))
    }

    /// `runOnResponse(res, app)` — sequential compose; a thrown error
    /// propagates.
    pub async fn run_on_response(&self, res: WireResponse, ctx_for: impl Fn(&str) -> PluginContext) -> Result<WireResponse> {
        let mut current = res;
        for plugin in self.snapshot_order() {
            let ctx = ctx_for(plugin.name());
            current = plugin.on_response(current, &ctx).await.map_err(|e| {
                Error::Plugin(PluginError::Hook {
                    plugin: plugin.name().to_string(),
                    message: e.to_string(),
                })
            })?;
        }
        Ok(current)
    }

    /// `runOnShutdown()` — reverse registration order; per-plugin errors
    /// are caught and logged so shutdown completes.
    pub async fn run_on_shutdown(&self, ctx_for: impl Fn(&str) -> PluginContext) {
        for plugin in self.snapshot_order().into_iter().rev() {
            let ctx = ctx_for(plugin.name());
            if let Err(e) = plugin.on_shutdown(&ctx).await {
                tracing::error!(plugin = plugin.name(), error = %e, "onShutdown hook failed");
            }
        }
    }

    /// `runOnServerStart` — forward order, errors caught and logged.
    pub async fn run_on_server_start(&self, ctx_for: impl Fn(&str) -> PluginContext) {
        for plugin in self.snapshot_order() {
            let ctx = ctx_for(plugin.name());
            if let Err(e) = plugin.on_server_start(&ctx).await {
                tracing::error!(plugin = plugin.name(), error = %e, "onServerStart hook failed");
            }
        }
    }

    /// `runOnWorkerSpawn` — forward order, errors caught and logged.
    pub async fn run_on_worker_spawn(&self, key: &str, ctx_for: impl Fn(&str) -> PluginContext) {
        for plugin in self.snapshot_order() {
            let ctx = ctx_for(plugin.name());
            if let Err(e) = plugin.on_worker_spawn(key, &ctx).await {
                tracing::error!(plugin = plugin.name(), error = %e, "onWorkerSpawn hook failed");
            }
        }
    }

    /// `runOnWorkerTerminate` — forward order, errors caught and logged.
    pub async fn run_on_worker_terminate(&self, key: &str, ctx_for: impl Fn(&str) -> PluginContext) {
        for plugin in self.snapshot_order() {
            let ctx = ctx_for(plugin.name());
            if let Err(e) = plugin.on_worker_terminate(key, &ctx).await {
                tracing::error!(plugin = plugin.name(), error = %e, "onWorkerTerminate hook failed");
            }
        }
    }
}
