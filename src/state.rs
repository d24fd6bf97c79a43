//! Application state shared across handlers: the pieces `pipeline.rs` and
//! `health.rs` need a handle to, held by `Arc` so cloning `AppState` is
//! cheap.

use std::sync::Arc;

use acton_reactive::prelude::AgentHandle;

use crate::agents::BackgroundWorker;
use crate::config::Config;
use crate::hrana::HranaServer;
use crate::plugin::PluginRegistry;
use crate::worker::pool::WorkerPool;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: Arc<WorkerPool>,
    plugins: Arc<PluginRegistry>,
    hrana: Arc<HranaServer>,
    background: BackgroundWorker,
    health_monitor: Option<AgentHandle>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        pool: Arc<WorkerPool>,
        plugins: Arc<PluginRegistry>,
        hrana: Arc<HranaServer>,
        background: BackgroundWorker,
    ) -> Self {
        Self {
            config,
            pool,
            plugins,
            hrana,
            background,
            health_monitor: None,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn hrana(&self) -> &Arc<HranaServer> {
        &self.hrana
    }

    pub fn background(&self) -> &BackgroundWorker {
        &self.background
    }

    pub fn health_monitor(&self) -> Option<&AgentHandle> {
        self.health_monitor.as_ref()
    }

    /// Attach the health monitor agent handle, obtained after the agent
    /// runtime is up (§4.3 "(f) runtime metadata" parallels this: state is
    /// assembled once the supporting actors exist).
    pub fn with_health_monitor(mut self, handle: AgentHandle) -> Self {
        self.health_monitor = Some(handle);
        self
    }

    pub fn metrics_snapshot(&self) -> crate::metrics::RuntimeMetrics {
        crate::metrics::RuntimeMetrics::snapshot(self.pool.get_metrics(), &self.plugins, self.hrana.sessions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hrana::SessionManager;
    use std::time::Duration;

    struct NullResolver;

    #[async_trait::async_trait]
    impl crate::hrana::AdapterResolver for NullResolver {
        async fn get_adapter(
            &self,
            _adapter_type: &str,
            _namespace: &str,
        ) -> Result<Arc<dyn crate::hrana::DatabaseAdapter>, crate::hrana::AdapterError> {
            Err(crate::hrana::AdapterError::new("no adapters configured in this test"))
        }

        async fn get_root_adapter(
            &self,
            _adapter_type: &str,
        ) -> Result<Arc<dyn crate::hrana::DatabaseAdapter>, crate::hrana::AdapterError> {
            Err(crate::hrana::AdapterError::new("no adapters configured in this test"))
        }
    }

    #[tokio::test]
    async fn metrics_snapshot_reflects_empty_runtime() {
        let mut runtime = acton_reactive::prelude::ActonApp::launch();
        let background = BackgroundWorker::spawn(&mut runtime).await.unwrap();

        let config = Arc::new(Config::default());
        let pool = WorkerPool::new(config.pool.clone(), background.clone(), "http://127.0.0.1:0".to_string());
        let plugins = PluginRegistry::new(config.clone(), Some(pool.clone()));
        let sessions = Arc::new(SessionManager::new(Duration::from_secs(30)));
        let hrana = Arc::new(HranaServer::new(sessions, Arc::new(NullResolver), None));

        let state = AppState::new(config, pool, plugins, hrana, background);
        let snapshot = state.metrics_snapshot();
        assert_eq!(snapshot.plugins_loaded, 0);
        assert_eq!(snapshot.hrana_sessions_active, 0);
    }
}
