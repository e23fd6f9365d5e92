use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Browser session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Cookie name for the browser session id.
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,

    /// Session duration in seconds.
    #[serde(default = "default_session_duration")]
    pub duration_secs: u64,

    /// Use secure cookies (HTTPS only).
    #[serde(default = "default_true")]
    pub secure: bool,

    /// SameSite cookie attribute.
    #[serde(default)]
    pub same_site: SameSite,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_session_cookie(),
            duration_secs: default_session_duration(),
            secure: true,
            same_site: SameSite::default(),
        }
    }
}

impl SessionConfig {
    /// Validate the session configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cookie_name.is_empty() {
            return Err(ConfigError::Validation(
                "Session cookie name cannot be empty".into(),
            ));
        }
        if self.duration_secs == 0 {
            return Err(ConfigError::Validation(
                "Session duration cannot be zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_session_cookie() -> String {
    "fedauth_session".to_string()
}

fn default_session_duration() -> u64 {
    86400 // 24 hours
}

/// SameSite cookie attribute.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

// ─────────────────────────────────────────────────────────────────────────────
// Federation
// ─────────────────────────────────────────────────────────────────────────────

/// Federated login configuration.
///
/// URL templates may contain `{host}` and `{port}` placeholders, which are
/// replaced with [`FederationConfig::host`] and [`FederationConfig::port`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FederationConfig {
    /// Use the embedded IdP emulator instead of a real SP module.
    #[serde(default)]
    pub emulate_idp: bool,

    /// Public host name of the application, as seen by the SP module.
    #[serde(default = "default_host")]
    pub host: String,

    /// Public port of the application, as seen by the SP module.
    #[serde(default = "default_port")]
    pub port: u16,

    /// SP session initiator. The broker appends `?target=<callback_url>`.
    #[serde(default = "default_login_url")]
    pub login_url: String,

    /// SP logout handler.
    #[serde(default = "default_logout_url")]
    pub logout_url: String,

    /// Where the SP module sends the browser once the IdP is done.
    #[serde(default = "default_callback_url")]
    pub callback_url: String,

    /// Attribute carrying the email address (the federation key).
    #[serde(default = "default_email_attribute")]
    pub email_attribute: String,

    /// Attribute carrying the given name.
    #[serde(default = "default_first_name_attribute")]
    pub first_name_attribute: String,

    /// Attribute carrying the surname.
    #[serde(default = "default_last_name_attribute")]
    pub last_name_attribute: String,

    /// Create accounts for unknown federated users.
    #[serde(default = "default_true")]
    pub add_new_users: bool,

    /// Group new federated users are attached to (UUID or name).
    /// Required when `add_new_users` is enabled.
    #[serde(default)]
    pub default_group: Option<String>,

    /// Lifetime of a pending emulated authentication, in seconds.
    #[serde(default = "default_pending_state_ttl")]
    pub pending_state_ttl_secs: u64,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            emulate_idp: false,
            host: default_host(),
            port: default_port(),
            login_url: default_login_url(),
            logout_url: default_logout_url(),
            callback_url: default_callback_url(),
            email_attribute: default_email_attribute(),
            first_name_attribute: default_first_name_attribute(),
            last_name_attribute: default_last_name_attribute(),
            add_new_users: true,
            default_group: None,
            pending_state_ttl_secs: default_pending_state_ttl(),
        }
    }
}

impl FederationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.add_new_users
            && self
                .default_group
                .as_deref()
                .is_none_or(|g| g.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "federation.add_new_users requires federation.default_group".into(),
            ));
        }
        for (name, value) in [
            ("email_attribute", &self.email_attribute),
            ("first_name_attribute", &self.first_name_attribute),
            ("last_name_attribute", &self.last_name_attribute),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "federation.{name} cannot be empty"
                )));
            }
        }
        if self.pending_state_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "federation.pending_state_ttl_secs cannot be zero".into(),
            ));
        }
        Ok(())
    }

    /// Substitute `{host}` and `{port}` in a URL template.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{host}", &self.host)
            .replace("{port}", &self.port.to_string())
    }

    /// Rendered callback URL.
    pub fn callback_url(&self) -> String {
        self.render(&self.callback_url)
    }

    /// Rendered SP logout URL.
    pub fn logout_url(&self) -> String {
        self.render(&self.logout_url)
    }

    /// SP session initiator with the callback as its `target` parameter.
    pub fn external_login_url(&self) -> String {
        with_target(&self.render(&self.login_url), &self.callback_url())
    }
}

/// Append `target=<encoded>` to a URL, respecting an existing query string.
pub fn with_target(base: &str, target: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}target={encoded}")
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    443
}

fn default_login_url() -> String {
    "https://{host}:{port}/Shibboleth.sso/Login".to_string()
}

fn default_logout_url() -> String {
    "https://{host}/Shibboleth.sso/Logout".to_string()
}

fn default_callback_url() -> String {
    "https://{host}:{port}/auth/idp/authorize".to_string()
}

fn default_email_attribute() -> String {
    "mail".to_string()
}

fn default_first_name_attribute() -> String {
    "givenName".to_string()
}

fn default_last_name_attribute() -> String {
    "sn".to_string()
}

fn default_pending_state_ttl() -> u64 {
    600 // 10 minutes
}

// ─────────────────────────────────────────────────────────────────────────────
// Local login
// ─────────────────────────────────────────────────────────────────────────────

/// Local (email + password) login configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalLoginConfig {
    /// Destination showing the local login form.
    #[serde(default = "default_login_view")]
    pub login_view: String,

    /// Form field carrying the email address.
    #[serde(default = "default_user_field")]
    pub user_field: String,

    /// Form field carrying the password.
    #[serde(default = "default_pass_field")]
    pub pass_field: String,
}

impl Default for LocalLoginConfig {
    fn default() -> Self {
        Self {
            login_view: default_login_view(),
            user_field: default_user_field(),
            pass_field: default_pass_field(),
        }
    }
}

impl LocalLoginConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_field.is_empty() || self.pass_field.is_empty() {
            return Err(ConfigError::Validation(
                "local.user_field and local.pass_field cannot be empty".into(),
            ));
        }
        if self.user_field == self.pass_field {
            return Err(ConfigError::Validation(
                "local.user_field and local.pass_field must differ".into(),
            ));
        }
        Ok(())
    }
}

fn default_login_view() -> String {
    "login".to_string()
}

fn default_user_field() -> String {
    "email".to_string()
}

fn default_pass_field() -> String {
    "password".to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Destinations and views
// ─────────────────────────────────────────────────────────────────────────────

/// Where each terminal outcome sends the browser.
///
/// Each value is a view name (rendered if `[views].dir` contains
/// `<name>.html`) or otherwise a URL to redirect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationsConfig {
    #[serde(default = "default_root")]
    pub idp_authenticated: String,

    #[serde(default = "default_unauthorized")]
    pub idp_unauthorized: String,

    #[serde(default = "default_login_failure")]
    pub login_failure: String,

    #[serde(default = "default_root")]
    pub local_authorized: String,

    #[serde(default = "default_local_unauthorized")]
    pub local_unauthorized: String,

    #[serde(default = "default_root")]
    pub local_logout: String,
}

impl Default for DestinationsConfig {
    fn default() -> Self {
        Self {
            idp_authenticated: default_root(),
            idp_unauthorized: default_unauthorized(),
            login_failure: default_login_failure(),
            local_authorized: default_root(),
            local_unauthorized: default_local_unauthorized(),
            local_logout: default_root(),
        }
    }
}

fn default_root() -> String {
    "/".to_string()
}

fn default_unauthorized() -> String {
    "/unauthorized".to_string()
}

fn default_login_failure() -> String {
    "/login-failed".to_string()
}

fn default_local_unauthorized() -> String {
    "/auth/local/login".to_string()
}

/// View templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewsConfig {
    /// Directory of `<name>.html` files. Without it every destination redirects.
    #[serde(default)]
    pub dir: Option<std::path::PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Emulator
// ─────────────────────────────────────────────────────────────────────────────

/// Identities known to the IdP emulator.
///
/// ```toml
/// [emulator.users.jdoe]
/// mail = "jdoe@example.edu"
/// givenName = "Jane"
/// sn = "Doe"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmulatorConfig {
    /// Username to attribute name/value pairs.
    #[serde(default)]
    pub users: HashMap<String, HashMap<String, String>>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_login_url_encodes_callback() {
        let config = FederationConfig {
            host: "app.example.edu".into(),
            port: 8443,
            ..Default::default()
        };
        assert_eq!(
            config.external_login_url(),
            "https://app.example.edu:8443/Shibboleth.sso/Login\
             ?target=https%3A%2F%2Fapp.example.edu%3A8443%2Fauth%2Fidp%2Fauthorize"
        );
        assert_eq!(
            config.logout_url(),
            "https://app.example.edu/Shibboleth.sso/Logout"
        );
    }

    #[test]
    fn test_with_target_respects_existing_query() {
        assert_eq!(
            with_target("/sso?entity=x", "/cb"),
            "/sso?entity=x&target=%2Fcb"
        );
    }

    #[test]
    fn test_auto_provision_requires_default_group() {
        let config = FederationConfig::default();
        assert!(config.validate().is_err());

        let config = FederationConfig {
            add_new_users: false,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_pending_ttl_rejected() {
        let config = FederationConfig {
            default_group: Some("new-users".into()),
            pending_state_ttl_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_fields_rejected() {
        let config = LocalLoginConfig {
            user_field: "login".into(),
            pass_field: "login".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
