//! Plugin load phase (§4.3 "Load phase"): enable/disable partition,
//! dependency-graph construction, Kahn's-algorithm topological sort,
//! `on_init` with a 30s timeout, and `provides()` registration.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, PluginError, Result};

use super::context::PluginFactory;
use super::manifest::validate_base_path;
use super::registry::PluginRegistry;
use super::scan::ScannedPlugin;

/// Resolve a factory by manifest name (falling back to `plugin_entry` if
/// given) and map lookup failure to a configuration error.
fn resolve_factory<'a>(
    scanned: &ScannedPlugin,
    factories: &'a HashMap<String, PluginFactory>,
) -> Result<&'a PluginFactory> {
    let key = scanned
        .manifest
        .plugin_entry
        .as_deref()
        .unwrap_or(&scanned.manifest.name);
    factories.get(key).ok_or_else(|| {
        Error::Plugin(PluginError::Configuration {
            plugin: scanned.manifest.name.clone(),
            message: format!("no factory registered for entry '{key}'"),
        })
    })
}

/// Partition scanned plugins into enabled and disabled, build the
/// dependency DAG over the enabled set, sort it, instantiate each plugin in
/// order, and register it with `registry`.
pub async fn load_plugins(
    scanned: Vec<ScannedPlugin>,
    factories: &HashMap<String, PluginFactory>,
    registry: &Arc<PluginRegistry>,
) -> Result<()> {
    let config = registry.config().clone();
    let mut enabled: HashMap<String, ScannedPlugin> = HashMap::new();
    let mut disabled: HashSet<String> = HashSet::new();
    for plugin in scanned {
        if plugin.manifest.enabled {
            enabled.insert(plugin.manifest.name.clone(), plugin);
        } else {
            tracing::info!(plugin = %plugin.manifest.name, "plugin disabled, not imported");
            disabled.insert(plugin.manifest.name.clone());
        }
    }

    let order = topological_order(&enabled, &disabled)?;

    let mut reserved = vec!["/api".to_string(), "/.well-known".to_string()];
    if !config.plugins.api_prefix.is_empty() {
        reserved.push(config.plugins.api_prefix.clone());
    }
    reserved.extend(config.plugins.reserved_bases.iter().cloned());

    for name in order {
        let scanned = enabled.get(&name).expect("name came from this map's keys");

        if let Some(base) = &scanned.manifest.base {
            validate_base_path(&name, base, &reserved)?;
        }

        let factory = resolve_factory(scanned, factories)?;
        let plugin = factory(scanned.manifest.options.clone())?;

        let ctx = registry.build_context(&name, scanned.manifest.options.clone());

        let init_timeout = Duration::from_secs(config.plugins.init_timeout_secs);
        match tokio::time::timeout(init_timeout, plugin.on_init(&ctx)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(Error::Plugin(PluginError::Hook {
                    plugin: name,
                    message: e.to_string(),
                }))
            }
            Err(_) => return Err(Error::Plugin(PluginError::InitTimeout(name))),
        }

        let provided = plugin.provides(&ctx).await.map_err(|e| {
            Error::Plugin(PluginError::Hook {
                plugin: name.clone(),
                message: e.to_string(),
            })
        })?;
        for (service_name, handle) in provided {
            registry.services().insert(service_name, handle);
        }

        let routes = plugin.routes(&ctx).await.map_err(|e| {
            Error::Plugin(PluginError::Hook {
                plugin: name.clone(),
                message: e.to_string(),
            })
        })?;
        registry.register_routes(&name, routes);

        registry.register(plugin, scanned.dir.clone(), scanned.manifest.base.clone())?;
    }

    Ok(())
}

/// Build the dependency DAG over `enabled` and sort it with Kahn's
/// algorithm. A required dependency absent or disabled is a fatal
/// configuration error; an optional dependency absent is silently dropped
/// from the graph.
fn topological_order(
    enabled: &HashMap<String, ScannedPlugin>,
    disabled: &HashSet<String>,
) -> Result<Vec<String>> {
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for name in enabled.keys() {
        in_degree.entry(name.clone()).or_insert(0);
    }

    for (name, plugin) in enabled {
        for dep in &plugin.manifest.dependencies {
            if !enabled.contains_key(dep) {
                let reason = if disabled.contains(dep) { "disabled" } else { "absent" };
                return Err(Error::Plugin(PluginError::MissingDependency {
                    plugin: name.clone(),
                    dependency: dep.clone(),
                    reason,
                }));
            }
            dependents.entry(dep.clone()).or_default().push(name.clone());
            *in_degree.get_mut(name).expect("seeded above") += 1;
        }
        for dep in &plugin.manifest.optional_dependencies {
            if enabled.contains_key(dep) {
                dependents.entry(dep.clone()).or_default().push(name.clone());
                *in_degree.get_mut(name).expect("seeded above") += 1;
            }
        }
    }

    // Deterministic order among initially-ready nodes.
    let mut initially_ready: Vec<String> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| name.clone())
        .collect();
    initially_ready.sort();
    let mut queue: VecDeque<String> = initially_ready.into();

    let mut order = Vec::with_capacity(enabled.len());
    let mut remaining = in_degree.clone();

    while let Some(name) = queue.pop_front() {
        order.push(name.clone());
        if let Some(deps) = dependents.get(&name) {
            let mut newly_ready = Vec::new();
            for dependent in deps {
                let degree = remaining.get_mut(dependent).expect("seeded above");
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(dependent.clone());
                }
            }
            newly_ready.sort();
            for n in newly_ready {
                queue.push_back(n);
            }
        }
    }

    if order.len() != enabled.len() {
        let resolved: HashSet<&String> = order.iter().collect();
        let mut residual: Vec<String> = enabled
            .keys()
            .filter(|name| !resolved.contains(name))
            .cloned()
            .collect();
        residual.sort();
        return Err(Error::Plugin(PluginError::Cycle(residual)));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::manifest::PluginManifest;
    use std::path::PathBuf;

    fn plugin(name: &str, deps: Vec<&str>) -> ScannedPlugin {
        ScannedPlugin {
            manifest: PluginManifest {
                name: name.to_string(),
                version: None,
                enabled: true,
                dependencies: deps.into_iter().map(String::from).collect(),
                optional_dependencies: Vec::new(),
                base: None,
                plugin_entry: None,
                options: HashMap::new(),
            },
            dir: PathBuf::from(format!("/plugins/{name}")),
            manifest_path: PathBuf::from(format!("/plugins/{name}/plugin.toml")),
        }
    }

    #[test]
    fn sorts_plugins_after_their_dependencies() {
        let mut enabled = HashMap::new();
        enabled.insert("b".to_string(), plugin("b", vec!["a"]));
        enabled.insert("a".to_string(), plugin("a", vec![]));
        let order = topological_order(&enabled, &HashSet::new()).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn reports_missing_required_dependency() {
        let mut enabled = HashMap::new();
        enabled.insert("b".to_string(), plugin("b", vec!["missing"]));
        let err = topological_order(&enabled, &HashSet::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::Plugin(PluginError::MissingDependency { .. })
        ));
    }

    #[test]
    fn reports_a_cycle() {
        let mut enabled = HashMap::new();
        enabled.insert("a".to_string(), plugin("a", vec!["b"]));
        enabled.insert("b".to_string(), plugin("b", vec!["a"]));
        let err = topological_order(&enabled, &HashSet::new()).unwrap_err();
        match err {
            Error::Plugin(PluginError::Cycle(residual)) => {
                assert_eq!(residual, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected Cycle, got {other:?}"),
        }
    }
}
