//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (prefix: `RUNTIME_`)
//! 2. Current working directory: `./config.toml`
//! 3. XDG config directory: `~/.config/runtime-core/{service_name}/config.toml`
//! 4. System directory: `/etc/runtime-core/{service_name}/config.toml`
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub pool: WorkerPoolConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub hrana: HranaConfig,
    #[serde(default)]
    pub middleware: MiddlewareConfig,
}

/// Service-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            port: default_port(),
            log_level: default_log_level(),
            timeout_secs: default_timeout(),
            environment: default_environment(),
        }
    }
}

/// Worker pool configuration (§3 WorkerConfig, §4.1 WorkerPool).
///
/// These are the defaults applied when an application directory does not
/// supply its own overrides; the pool itself is keyed per-application (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum number of cached persistent workers (LRU bound).
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,

    /// Default worker entrypoint filename.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,

    /// `ttl` in milliseconds. `0` denotes ephemeral mode.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Idle timeout in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum requests served by a single persistent worker before retirement.
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Run the worker with reduced memory footprint hints.
    #[serde(default)]
    pub low_memory: bool,

    /// Bound on historical/ephemeral stats maps (§3 Metrics state).
    #[serde(default = "default_stats_bound")]
    pub stats_bound: usize,

    /// Directory under which each tenant's application lives in its own
    /// subdirectory, named by the first path segment of the inbound
    /// request URL (e.g. `apps_root/acme/...` for a request to `/acme/...`).
    #[serde(default = "default_apps_root")]
    pub apps_root: PathBuf,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            entrypoint: default_entrypoint(),
            ttl_ms: default_ttl_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_requests: default_max_requests(),
            max_body_bytes: default_max_body_bytes(),
            low_memory: false,
            stats_bound: default_stats_bound(),
            apps_root: default_apps_root(),
        }
    }
}

/// Plugin loader configuration (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directories scanned for plugins, in order.
    #[serde(default)]
    pub directories: Vec<PathBuf>,

    /// Runtime API prefix, reserved against plugin `base` paths (§6).
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Additional reserved base paths beyond `/api` and `/.well-known`.
    #[serde(default)]
    pub reserved_bases: Vec<String>,

    /// Timeout, in seconds, for a plugin's `onInit` hook (non-configurable
    /// per spec §4.3, kept here only so tests can shrink it).
    #[serde(default = "default_plugin_init_timeout_secs")]
    pub init_timeout_secs: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            api_prefix: default_api_prefix(),
            reserved_bases: Vec::new(),
            init_timeout_secs: default_plugin_init_timeout_secs(),
        }
    }
}

/// HRANA protocol server configuration (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HranaConfig {
    /// HTTP path for the pipeline endpoint.
    #[serde(default = "default_hrana_path")]
    pub pipeline_path: String,
    /// WebSocket sibling path.
    #[serde(default = "default_hrana_ws_path")]
    pub websocket_path: String,
    /// Session inactivity window, in seconds.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    /// Sweeper period, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for HranaConfig {
    fn default() -> Self {
        Self {
            pipeline_path: default_hrana_path(),
            websocket_path: default_hrana_ws_path(),
            session_idle_secs: default_session_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Middleware stack configuration, reused verbatim in shape from the
/// teacher's `server.rs` layer composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,
    #[serde(default = "default_true")]
    pub catch_panic: bool,
    #[serde(default = "default_true")]
    pub compression: bool,
    #[serde(default = "default_cors_mode")]
    pub cors_mode: String,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            body_limit_mb: default_body_limit_mb(),
            catch_panic: true,
            compression: true,
            cors_mode: default_cors_mode(),
        }
    }
}

fn default_service_name() -> String {
    "runtime-core".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_pool_max_size() -> usize {
    100
}
fn default_entrypoint() -> String {
    "index.js".to_string()
}
fn default_ttl_ms() -> u64 {
    300_000
}
fn default_idle_timeout_ms() -> u64 {
    60_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_max_requests() -> u64 {
    1_000
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_stats_bound() -> usize {
    1_000
}
fn default_apps_root() -> PathBuf {
    PathBuf::from("./apps")
}
fn default_api_prefix() -> String {
    "/api".to_string()
}
fn default_plugin_init_timeout_secs() -> u64 {
    30
}
fn default_hrana_path() -> String {
    "/v2/pipeline".to_string()
}
fn default_hrana_ws_path() -> String {
    "/v2".to_string()
}
fn default_session_idle_secs() -> u64 {
    30
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_body_limit_mb() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_cors_mode() -> String {
    "permissive".to_string()
}

impl Config {
    /// Load configuration for the default service name, inferred from the
    /// current executable's file stem.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "runtime-core".to_string());
        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name.
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("RUNTIME_").split("__"));

        Ok(figment.extract()?)
    }

    /// Load configuration directly from a given file, bypassing XDG/system
    /// directories. Useful for tests and non-standard deployments.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RUNTIME_").split("__"))
            .extract()?;
        Ok(config)
    }

    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix("runtime-core");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Ok(path) = xdg_dirs.place_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc/runtime-core")
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_figment() {
        let cfg = Config::default();
        assert_eq!(cfg.pool.max_size, 100);
        assert_eq!(cfg.pool.ttl_ms, 300_000);
        assert_eq!(cfg.hrana.session_idle_secs, 30);
    }

    #[test]
    fn load_from_missing_file_falls_back_to_defaults() {
        let cfg = Config::load_from("/nonexistent/path/config.toml").unwrap();
        assert_eq!(cfg.service.port, 8080);
    }
}
