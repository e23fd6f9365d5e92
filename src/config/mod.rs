//! Configuration module for the authentication broker.
//!
//! The broker is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax. The file is parsed and
//! validated once at startup; the resulting [`BrokerConfig`] is immutable and
//! passed explicitly to every component that needs it.
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [database]
//! type = "sqlite"
//! path = "/var/lib/fedauth/fedauth.db"
//!
//! [federation]
//! emulate_idp = false
//! host = "app.example.edu"
//! default_group = "new-federated-users"
//! ```

mod auth;
mod cache;
mod database;
mod observability;
mod server;

use std::path::Path;

pub use auth::*;
pub use cache::*;
pub use database::*;
pub use observability::*;
use serde::{Deserialize, Serialize};
pub use server::*;

/// Root configuration for the broker.
///
/// All sections are optional with defaults. The only required setting is
/// `federation.default_group` while auto-provisioning is enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Account and group storage.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Shared cache used for pending authentication state and browser sessions.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Browser session cookie settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Federated login (real IdP or emulator) settings.
    #[serde(default)]
    pub federation: FederationConfig,

    /// Local (email + password) login settings.
    #[serde(default)]
    pub local: LocalLoginConfig,

    /// Where each terminal outcome sends the browser.
    #[serde(default)]
    pub destinations: DestinationsConfig,

    /// Named views that destinations may render instead of redirecting.
    #[serde(default)]
    pub views: ViewsConfig,

    /// Identities known to the embedded IdP emulator.
    #[serde(default)]
    pub emulator: EmulatorConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl BrokerConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let mut config: BrokerConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&mut self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.cache.validate()?;
        self.session.validate()?;
        self.federation.validate()?;
        self.local.validate()?;

        if self.federation.emulate_idp && self.emulator.users.is_empty() {
            tracing::warn!(
                "federation.emulate_idp is enabled but no [emulator.users] are configured; \
                 every emulated login will fail"
            );
        }

        if !self.federation.emulate_idp && !self.server.trusted_proxies.is_configured() {
            if !self.server.host.is_loopback() {
                return Err(ConfigError::Validation(
                    "Federated attributes are read from request headers, but the server binds \
                     to a non-localhost address without server.trusted_proxies configured. Any \
                     client could spoof identity headers. Configure \
                     server.trusted_proxies.cidrs with the address of the SP module's proxy, \
                     or bind to localhost."
                        .into(),
                ));
            }
            tracing::warn!(
                "server.trusted_proxies is not configured; identity headers will be accepted \
                 from any source that can reach the broker"
            );
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips variables that appear after a `#` on the same line.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("invalid interpolation pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BrokerConfig::from_str(
            r#"
            [federation]
            default_group = "new-users"
        "#,
        )
        .unwrap();

        assert!(!config.federation.emulate_idp);
        assert!(config.federation.add_new_users);
        assert_eq!(config.federation.pending_state_ttl_secs, 600);
        assert_eq!(config.local.user_field, "email");
        assert_eq!(config.local.pass_field, "password");
        assert!(matches!(config.database, DatabaseConfig::Memory));
    }

    #[test]
    fn test_emulator_users_parsed() {
        let config = BrokerConfig::from_str(
            r#"
            [federation]
            emulate_idp = true
            default_group = "new-users"

            [emulator.users.jdoe]
            mail = "jdoe@example.edu"
            givenName = "Jane"
            sn = "Doe"
        "#,
        )
        .unwrap();

        let jdoe = config.emulator.users.get("jdoe").unwrap();
        assert_eq!(jdoe.get("mail").map(String::as_str), Some("jdoe@example.edu"));
        assert_eq!(jdoe.get("sn").map(String::as_str), Some("Doe"));
    }

    #[test]
    fn test_auto_provision_without_default_group_rejected() {
        let result = BrokerConfig::from_str("");
        assert!(matches!(result, Err(ConfigError::Validation(msg)) if msg.contains("default_group")));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = BrokerConfig::from_str(
            r#"
            [federation]
            emulate_idp = true
            not_a_setting = 1
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_public_bind_without_trusted_proxies_rejected() {
        let result = BrokerConfig::from_str(
            r#"
            [server]
            host = "0.0.0.0"

            [federation]
            default_group = "new-users"
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(msg)) if msg.contains("trusted_proxies")));
    }

    #[test]
    fn test_public_bind_with_emulator_allowed() {
        let config = BrokerConfig::from_str(
            r#"
            [server]
            host = "0.0.0.0"

            [federation]
            emulate_idp = true
            default_group = "new-users"
        "#,
        )
        .unwrap();
        assert!(config.federation.emulate_idp);
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("FEDAUTH_TEST_HOST", Some("sso.example.edu"), || {
            let result = expand_env_vars("host = \"${FEDAUTH_TEST_HOST}\"").unwrap();
            assert_eq!(result, "host = \"sso.example.edu\"");
        });
    }

    #[test]
    fn test_env_var_missing_is_error() {
        temp_env::with_var_unset("FEDAUTH_TEST_MISSING", || {
            let result = expand_env_vars("host = \"${FEDAUTH_TEST_MISSING}\"");
            assert!(matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "FEDAUTH_TEST_MISSING"));
        });
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# host = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# host = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_env_var_after_comment_ignored() {
        let result = expand_env_vars("key = \"value\" # ${NONEXISTENT_VAR}").unwrap();
        assert_eq!(result, "key = \"value\" # ${NONEXISTENT_VAR}");
    }

    #[test]
    fn test_env_var_multiline_preserves_layout() {
        temp_env::with_var("FEDAUTH_TEST_PORT", Some("8443"), || {
            let result = expand_env_vars("[server]\nport = ${FEDAUTH_TEST_PORT}\n").unwrap();
            assert_eq!(result, "[server]\nport = 8443\n");
        });
    }
}
