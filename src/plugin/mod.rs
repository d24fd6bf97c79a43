//! Plugin loader and registry (§4.3).
//!
//! Plugins are discovered by scanning directories for manifests
//! ([`scan`]), partitioned and topologically sorted over their declared
//! dependencies ([`loader`]), and instantiated through a caller-supplied
//! [`context::PluginFactory`] map — Rust has no runtime module import, so
//! the manifest's `name` (or `plugin_entry`) resolves to a factory
//! registered ahead of time rather than a file to load. Once loaded,
//! plugins live in a [`registry::PluginRegistry`] for the life of the
//! process.

pub mod context;
pub mod loader;
pub mod manifest;
#[cfg(feature = "paseto-auth")]
pub mod paseto_auth;
pub mod registry;
pub mod route_matcher;
pub mod scan;

pub use context::{HookOutcome, Plugin, PluginContext, PluginFactory, PluginRoute, RouteHandler, RuntimeMeta};
pub use loader::load_plugins;
pub use manifest::{validate_base_path, PluginManifest};
#[cfg(feature = "paseto-auth")]
pub use paseto_auth::PasetoAuthPlugin;
pub use registry::PluginRegistry;
pub use route_matcher::{PublicRouteMatcher, PublicRouteSpec};
pub use scan::{scan_roots, ScannedPlugin};
