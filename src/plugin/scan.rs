//! Plugin directory scan (§4.3 "Scan phase"). No plugin code is invoked
//! here — only manifests are read and the plugin's identity and declared
//! entry point are recorded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, PluginError, Result};

use super::manifest::PluginManifest;

/// One discovered plugin: its manifest, the directory it was found in, and
/// the path to the manifest file itself (for diagnostics).
#[derive(Debug, Clone)]
pub struct ScannedPlugin {
    pub manifest: PluginManifest,
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
}

const MANIFEST_FILENAMES: &[&str] = &["plugin.toml", "manifest.toml"];

/// Walk every configured root directory, accepting the three layouts of
/// §4.3: (a) a manifest file alongside its entry file, (b) a subdirectory
/// containing a manifest plus an entry, (c) a scoped subdirectory
/// `@scope/name/...`. Plugins are identified by the manifest's `name`
/// field; a duplicate name is reported and the later occurrence dropped.
pub fn scan_roots(roots: &[PathBuf]) -> Result<Vec<ScannedPlugin>> {
    let mut by_name: HashMap<String, ScannedPlugin> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for root in roots {
        if !root.is_dir() {
            continue;
        }
        for found in scan_one_root(root)? {
            if by_name.contains_key(&found.manifest.name) {
                tracing::warn!(
                    plugin = %found.manifest.name,
                    dir = %found.dir.display(),
                    "duplicate plugin name, dropping this occurrence"
                );
                continue;
            }
            order.push(found.manifest.name.clone());
            by_name.insert(found.manifest.name.clone(), found);
        }
    }

    Ok(order.into_iter().filter_map(|name| by_name.remove(&name)).collect())
}

fn scan_one_root(root: &Path) -> Result<Vec<ScannedPlugin>> {
    let mut found = Vec::new();

    // Layout (a): a manifest file directly inside `root`.
    for filename in MANIFEST_FILENAMES {
        let candidate = root.join(filename);
        if candidate.is_file() {
            found.push(load_manifest(root.to_path_buf(), candidate)?);
        }
    }

    // Layouts (b) and (c): one level of subdirectories, with scoped
    // `@scope/name` directories recursing one level further.
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let dir_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        if let Some(manifest_path) = find_manifest_in(&path) {
            found.push(load_manifest(path.clone(), manifest_path)?);
            continue;
        }

        if dir_name.starts_with('@') {
            for scoped in std::fs::read_dir(&path)? {
                let scoped = scoped?;
                let scoped_path = scoped.path();
                if !scoped_path.is_dir() {
                    continue;
                }
                if let Some(manifest_path) = find_manifest_in(&scoped_path) {
                    found.push(load_manifest(scoped_path, manifest_path)?);
                }
            }
        }
    }

    Ok(found)
}

fn find_manifest_in(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILENAMES
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.is_file())
}

fn load_manifest(dir: PathBuf, manifest_path: PathBuf) -> Result<ScannedPlugin> {
    let raw = std::fs::read_to_string(&manifest_path)?;
    let manifest: PluginManifest = toml::from_str(&raw).map_err(|e| {
        Error::Plugin(PluginError::Configuration {
            plugin: manifest_path.display().to_string(),
            message: format!("malformed manifest: {e}"),
        })
    })?;
    Ok(ScannedPlugin {
        manifest,
        dir,
        manifest_path,
    })
}
