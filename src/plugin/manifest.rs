//! Plugin manifest parsing and `base` path validation (§4.3, §6 "Plugin
//! manifest").

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::PluginError;

fn default_true() -> bool {
    true
}

/// The manifest document shipped alongside (or inside) a plugin directory.
///
/// Reserved fields are named explicitly; everything else is free-form
/// configuration forwarded to the plugin's factory as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub optional_dependencies: Vec<String>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub plugin_entry: Option<String>,
    /// Free-form options passed to the plugin's factory, minus the
    /// reserved fields above.
    #[serde(flatten)]
    pub options: HashMap<String, Value>,
}

/// `base` path segment: `/`, or one or more `/segment` where `segment` is
/// `[a-zA-Z0-9_-]+`.
static BASE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/[a-zA-Z0-9_-]+)+$").expect("fixed base-path pattern"));

/// Validate a plugin's `base` path against the syntax rule and the
/// reserved-path list (§6 "Reserved base paths").
pub fn validate_base_path(plugin: &str, base: &str, reserved: &[String]) -> Result<(), PluginError> {
    if base != "/" && !BASE_PATH.is_match(base) {
        return Err(PluginError::Configuration {
            plugin: plugin.to_string(),
            message: format!("invalid base path '{base}': must be '/' or '/segment' repeated"),
        });
    }
    for r in reserved {
        if base == r || base.starts_with(&format!("{r}/")) {
            return Err(PluginError::Configuration {
                plugin: plugin.to_string(),
                message: format!("base path '{base}' collides with reserved path '{r}'"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_root_and_simple_segments() {
        assert!(validate_base_path("p", "/", &[]).is_ok());
        assert!(validate_base_path("p", "/admin", &[]).is_ok());
        assert!(validate_base_path("p", "/admin/users", &[]).is_ok());
    }

    #[test]
    fn rejects_malformed_base_path() {
        assert!(validate_base_path("p", "admin", &[]).is_err());
        assert!(validate_base_path("p", "/admin/", &[]).is_err());
        assert!(validate_base_path("p", "//admin", &[]).is_err());
    }

    #[test]
    fn rejects_reserved_paths() {
        let reserved = vec!["/api".to_string(), "/.well-known".to_string()];
        assert!(validate_base_path("p", "/api", &reserved).is_err());
        assert!(validate_base_path("p", "/api/v1", &reserved).is_err());
        assert!(validate_base_path("p", "/apiextra", &reserved).is_ok());
    }
}
