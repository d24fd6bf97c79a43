//! Built-in PASETO-based authentication plugin (spec.md §1: "a set of
//! built-in plugins (reverse proxy, authentication, key-value store,
//! database bridge)"). Validates a `Bearer` PASETO v4.local token on every
//! request and denies with 401 when it is missing, malformed, or fails
//! parsing — the same "wrap a handler, 401 on failure" shape as the
//! teacher's `PasetoAuth` middleware, reused here as an `onRequest` hook
//! instead of a `tower::Layer`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use rusty_paseto::prelude::*;
use serde_json::Value;

use crate::error::{Error, PluginError, Result};
use crate::worker::instance::encode_body;
use crate::worker::message::{WireRequest, WireResponse};

use super::context::{HookOutcome, Plugin, PluginContext, PluginFactory};

/// Validates bearer tokens against one symmetric v4.local key.
pub struct PasetoAuthPlugin {
    key_bytes: [u8; 32],
    issuer: Option<String>,
    audience: Option<String>,
}

impl PasetoAuthPlugin {
    pub fn new(key_bytes: [u8; 32], issuer: Option<String>, audience: Option<String>) -> Self {
        Self {
            key_bytes,
            issuer,
            audience,
        }
    }

    fn deny(message: &str) -> HookOutcome {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        HookOutcome::Respond(WireResponse {
            status: 401,
            headers,
            body: Some(encode_body(message.as_bytes())),
        })
    }
}

#[async_trait]
impl Plugin for PasetoAuthPlugin {
    fn name(&self) -> &str {
        "paseto-auth"
    }

    async fn on_request(&self, req: WireRequest, _ctx: &PluginContext) -> Result<HookOutcome> {
        let Some(header) = req.headers.get("authorization") else {
            return Ok(Self::deny("missing Authorization header"));
        };
        let Some(token) = header.strip_prefix("Bearer ") else {
            return Ok(Self::deny("Authorization header is not a Bearer token"));
        };

        let key = PasetoSymmetricKey::<V4, Local>::from(Key::from(&self.key_bytes));
        let mut parser = PasetoParser::<V4, Local>::default();
        if let Some(iss) = &self.issuer {
            parser.check_claim(IssuerClaim::from(iss.as_str()));
        }
        if let Some(aud) = &self.audience {
            parser.check_claim(AudienceClaim::from(aud.as_str()));
        }

        match parser.parse(token, &key) {
            Ok(_claims) => Ok(HookOutcome::Continue(req)),
            Err(e) => {
                tracing::warn!(error = %e, "rejected request with invalid PASETO token");
                Ok(Self::deny("invalid or expired token"))
            }
        }
    }
}

/// Build the [`PluginFactory`] the loader resolves `"paseto-auth"` to.
/// Reads a base64-encoded 32-byte v4.local key plus optional
/// `issuer`/`audience` out of the plugin manifest's options.
pub fn factory() -> PluginFactory {
    Arc::new(|options: HashMap<String, Value>| -> Result<Arc<dyn Plugin>> {
        let key_b64 = options
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Plugin(PluginError::Configuration {
                    plugin: "paseto-auth".to_string(),
                    message: "missing required 'key' option (base64-encoded 32-byte v4.local key)".to_string(),
                })
            })?;

        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_b64)
            .map_err(|e| {
                Error::Plugin(PluginError::Configuration {
                    plugin: "paseto-auth".to_string(),
                    message: format!("'key' is not valid base64: {e}"),
                })
            })?;
        let key_bytes: [u8; 32] = key_bytes.try_into().map_err(|_| {
            Error::Plugin(PluginError::Configuration {
                plugin: "paseto-auth".to_string(),
                message: "'key' must decode to exactly 32 bytes".to_string(),
            })
        })?;

        let issuer = options.get("issuer").and_then(Value::as_str).map(str::to_string);
        let audience = options.get("audience").and_then(Value::as_str).map(str::to_string);

        Ok(Arc::new(PasetoAuthPlugin::new(key_bytes, issuer, audience)) as Arc<dyn Plugin>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PluginContext {
        let config = Arc::new(crate::config::Config::default());
        let registry = super::super::registry::PluginRegistry::new(config, None);
        registry.context_for("paseto-auth")
    }

    fn token_for(key_bytes: &[u8; 32]) -> String {
        let key = PasetoSymmetricKey::<V4, Local>::from(Key::from(key_bytes));
        let mut builder = PasetoBuilder::<V4, Local>::default();
        builder.set_claim(SubjectClaim::from("user:test"));
        builder
            .build(&key)
            .expect("token builds with valid claims")
    }

    fn req_with_header(value: Option<&str>) -> WireRequest {
        let mut headers = HashMap::new();
        if let Some(v) = value {
            headers.insert("authorization".to_string(), v.to_string());
        }
        WireRequest {
            method: "GET".to_string(),
            url: "/".to_string(),
            headers,
            body: None,
        }
    }

    #[tokio::test]
    async fn denies_requests_with_no_authorization_header() {
        let plugin = PasetoAuthPlugin::new([7u8; 32], None, None);
        let outcome = plugin.on_request(req_with_header(None), &ctx()).await.unwrap();
        match outcome {
            HookOutcome::Respond(res) => assert_eq!(res.status, 401),
            HookOutcome::Continue(_) => panic!("expected a 401 response"),
        }
    }

    #[tokio::test]
    async fn denies_requests_with_a_malformed_bearer_token() {
        let plugin = PasetoAuthPlugin::new([7u8; 32], None, None);
        let outcome = plugin
            .on_request(req_with_header(Some("Bearer not-a-real-token")), &ctx())
            .await
            .unwrap();
        match outcome {
            HookOutcome::Respond(res) => assert_eq!(res.status, 401),
            HookOutcome::Continue(_) => panic!("expected a 401 response"),
        }
    }

    #[tokio::test]
    async fn accepts_a_validly_signed_token() {
        let key_bytes = [9u8; 32];
        let plugin = PasetoAuthPlugin::new(key_bytes, None, None);
        let token = token_for(&key_bytes);
        let header = format!("Bearer {token}");
        let outcome = plugin
            .on_request(req_with_header(Some(&header)), &ctx())
            .await
            .unwrap();
        assert!(matches!(outcome, HookOutcome::Continue(_)));
    }
}
