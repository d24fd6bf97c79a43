//! Public-route glob matching for plugin static routes (§6 "Public-route
//! specification").
//!
//! Glob-to-regex compilation is the same algorithm the teacher uses for
//! rate-limit route configs in `middleware::route_matcher`, generalized
//! here from "which rate limit applies" to "is this route public".

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A public-route declaration: either a flat list of globs applying to
/// every method, or a per-method map of globs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublicRouteSpec {
    AllMethods(Vec<String>),
    ByMethod(HashMap<String, Vec<String>>),
}

struct CompiledGlob {
    method: Option<String>,
    regex: Regex,
}

/// Compiled form of a [`PublicRouteSpec`], ready for repeated `is_public`
/// checks on the request hot path.
pub struct PublicRouteMatcher {
    globs: Vec<CompiledGlob>,
}

impl PublicRouteMatcher {
    pub fn compile(spec: &PublicRouteSpec) -> Self {
        let mut globs = Vec::new();
        match spec {
            PublicRouteSpec::AllMethods(patterns) => {
                for p in patterns {
                    globs.push(CompiledGlob {
                        method: None,
                        regex: glob_to_regex(p),
                    });
                }
            }
            PublicRouteSpec::ByMethod(by_method) => {
                for (method, patterns) in by_method {
                    let method = if method.eq_ignore_ascii_case("ALL") {
                        None
                    } else {
                        Some(method.to_uppercase())
                    };
                    for p in patterns {
                        globs.push(CompiledGlob {
                            method: method.clone(),
                            regex: glob_to_regex(p),
                        });
                    }
                }
            }
        }
        Self { globs }
    }

    pub fn empty() -> Self {
        Self { globs: Vec::new() }
    }

    pub fn is_public(&self, method: &str, path: &str) -> bool {
        let method = method.to_uppercase();
        self.globs.iter().any(|g| {
            g.method.as_deref().map(|m| m == method).unwrap_or(true) && g.regex.is_match(path)
        })
    }
}

/// Compile a glob (`*` = one segment, `**` = any number of segments,
/// `{name}` = one segment) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Regex {
    let mut regex_str = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex_str.push_str(".*");
                } else {
                    regex_str.push_str("[^/]+");
                }
            }
            '{' => {
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                }
                regex_str.push_str("[^/]+");
            }
            '.' | '+' | '?' | '(' | ')' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(c);
            }
            _ => regex_str.push(c),
        }
    }
    regex_str.push('$');
    Regex::new(&regex_str).expect("generated glob regex is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_all_methods_glob() {
        let matcher = PublicRouteMatcher::compile(&PublicRouteSpec::AllMethods(vec![
            "/public/*".to_string(),
        ]));
        assert!(matcher.is_public("GET", "/public/logo.png"));
        assert!(matcher.is_public("POST", "/public/logo.png"));
        assert!(!matcher.is_public("GET", "/public/nested/logo.png"));
    }

    #[test]
    fn matches_per_method_glob() {
        let mut by_method = HashMap::new();
        by_method.insert("GET".to_string(), vec!["/health".to_string()]);
        let matcher = PublicRouteMatcher::compile(&PublicRouteSpec::ByMethod(by_method));
        assert!(matcher.is_public("GET", "/health"));
        assert!(!matcher.is_public("POST", "/health"));
    }

    #[test]
    fn double_star_matches_any_depth() {
        let matcher = PublicRouteMatcher::compile(&PublicRouteSpec::AllMethods(vec![
            "/assets/**".to_string(),
        ]));
        assert!(matcher.is_public("GET", "/assets/a/b/c.js"));
    }
}
