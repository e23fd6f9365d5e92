//! Federated identity attributes and where they come from.
//!
//! A real SP module (e.g. `mod_shib`) hands attributes to the application as
//! request headers; the embedded emulator hands them over through its own
//! resolved pending state. [`AttributeSource`] hides the difference from the
//! broker.

use std::{collections::HashMap, net::IpAddr};

use async_trait::async_trait;
use axum::http::HeaderMap;
use ipnet::IpNet;

use super::{AuthError, emulator::EmulatedSp};
use crate::config::{FederationConfig, TrustedProxiesConfig, with_target};

/// Prefix Apache adds to environment-style variables after an internal redirect.
const REDIRECT_PREFIX: &str = "REDIRECT_";

/// Identity attributes returned by the IdP for one callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthAttributes {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl AuthAttributes {
    /// Build attributes from a lookup function. Empty values count as absent.
    pub fn from_lookup(names: &AttributeNames, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            email: get(&names.email),
            first_name: get(&names.first_name),
            last_name: get(&names.last_name),
        }
    }

    /// Build attributes from a raw name/value map.
    pub fn from_map(names: &AttributeNames, values: &HashMap<String, String>) -> Self {
        Self::from_lookup(names, |name| values.get(name).cloned())
    }
}

/// Attribute names carrying each identity field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeNames {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<&FederationConfig> for AttributeNames {
    fn from(config: &FederationConfig) -> Self {
        Self {
            email: config.email_attribute.clone(),
            first_name: config.first_name_attribute.clone(),
            last_name: config.last_name_attribute.clone(),
        }
    }
}

/// What a federated callback request exposes to an attribute source.
pub struct CallbackContext<'a> {
    pub headers: &'a HeaderMap,
    /// Address of the connecting peer, when the server knows it
    pub peer: Option<IpAddr>,
    /// Pending token bound to the browser by the emulated SP
    pub sp_token: Option<&'a str>,
}

/// Supplies the identity attributes of a federated callback.
#[async_trait]
pub trait AttributeSource: Send + Sync {
    /// Attributes for this callback, or `None` if it carries none.
    async fn extract(&self, ctx: &CallbackContext<'_>)
    -> Result<Option<AuthAttributes>, AuthError>;

    /// Where to send the browser to start a federated login.
    fn login_url(&self) -> String;

    /// Where to send the browser after a federated session is closed.
    fn logout_url(&self) -> String;

    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;
}

// ─────────────────────────────────────────────────────────────────────────────
// Real transport (SP module in front of the application)
// ─────────────────────────────────────────────────────────────────────────────

/// Reads attributes from request headers set by a real SP module.
///
/// Headers are only believed when the connecting peer is a trusted proxy.
pub struct RealTransportSource {
    names: AttributeNames,
    trusted_proxies: TrustedProxiesConfig,
    trusted_cidrs: Vec<IpNet>,
    login_url: String,
    logout_url: String,
}

impl RealTransportSource {
    pub fn new(config: &FederationConfig, trusted_proxies: &TrustedProxiesConfig) -> Self {
        Self {
            names: AttributeNames::from(config),
            trusted_proxies: trusted_proxies.clone(),
            trusted_cidrs: trusted_proxies.parsed_cidrs(),
            login_url: config.external_login_url(),
            logout_url: config.logout_url(),
        }
    }

    fn is_trusted_peer(&self, peer: Option<IpAddr>) -> bool {
        if !self.trusted_proxies.is_configured() {
            return true;
        }
        peer.is_some_and(|ip| self.trusted_proxies.is_trusted_ip(ip, &self.trusted_cidrs))
    }
}

/// Read a header, falling back to its `REDIRECT_`-prefixed variant.
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let read = |key: &str| {
        headers
            .get(key)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    read(name).or_else(|| read(&format!("{REDIRECT_PREFIX}{name}")))
}

#[async_trait]
impl AttributeSource for RealTransportSource {
    async fn extract(
        &self,
        ctx: &CallbackContext<'_>,
    ) -> Result<Option<AuthAttributes>, AuthError> {
        if !self.is_trusted_peer(ctx.peer) {
            tracing::warn!(
                peer = ?ctx.peer,
                "Ignoring identity headers from untrusted peer"
            );
            return Ok(None);
        }

        let attributes =
            AuthAttributes::from_lookup(&self.names, |name| header_value(ctx.headers, name));
        Ok(Some(attributes))
    }

    fn login_url(&self) -> String {
        self.login_url.clone()
    }

    fn logout_url(&self) -> String {
        self.logout_url.clone()
    }

    fn name(&self) -> &'static str {
        "transport"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Emulated transport
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point of the emulated SP.
pub const EMULATOR_LOGIN_PATH: &str = "/auth/emulator/login";

/// Logout handler of the emulated SP.
pub const EMULATOR_LOGOUT_PATH: &str = "/auth/emulator/logout";

/// The broker's federated callback.
pub const CALLBACK_PATH: &str = "/auth/idp/authorize";

/// Reads attributes from the emulated SP's resolved pending state.
pub struct EmulatedSource {
    sp: EmulatedSp,
}

impl EmulatedSource {
    pub fn new(sp: EmulatedSp) -> Self {
        Self { sp }
    }
}

#[async_trait]
impl AttributeSource for EmulatedSource {
    async fn extract(
        &self,
        ctx: &CallbackContext<'_>,
    ) -> Result<Option<AuthAttributes>, AuthError> {
        match self.sp.complete(ctx.sp_token).await {
            Ok(attributes) => Ok(Some(attributes)),
            Err(AuthError::SessionNotEstablished | AuthError::StateNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn login_url(&self) -> String {
        with_target(EMULATOR_LOGIN_PATH, CALLBACK_PATH)
    }

    fn logout_url(&self) -> String {
        EMULATOR_LOGOUT_PATH.to_string()
    }

    fn name(&self) -> &'static str {
        "emulator"
    }
}
