use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// How a principal authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Email + password against the local store
    Local,
    /// Provisioned from a federated login
    Federated,
}

impl AccountType {
    /// Convert to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Federated => "federated",
        }
    }

    /// Parse from database string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "federated" => Some(Self::Federated),
            _ => None,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A local account. The email is the federation key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub account_type: AccountType,
    pub enabled: bool,
    /// Argon2 PHC string; only local accounts carry one
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    /// Overlay names from a federated login. Absent values keep the stored name.
    pub fn overlay_names(&mut self, first_name: Option<&str>, last_name: Option<&str>) {
        if let Some(first) = first_name {
            self.first_name = Some(first.to_string());
        }
        if let Some(last) = last_name {
            self.last_name = Some(last.to_string());
        }
    }
}

/// Canonical form of an email address as stored and looked up. Addresses are
/// matched case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePrincipal {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 255))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub last_name: Option<String>,
    pub account_type: AccountType,
    pub enabled: bool,
    #[serde(skip)]
    pub password_hash: Option<String>,
}

impl CreatePrincipal {
    /// A federated account as provisioned on first login: disabled until an
    /// administrator reviews it.
    pub fn federated(
        email: impl Into<String>,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Self {
        Self {
            email: email.into(),
            first_name,
            last_name,
            account_type: AccountType::Federated,
            enabled: false,
            password_hash: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        let now = Utc::now();
        Principal {
            id: Uuid::new_v4(),
            email: "jdoe@example.edu".into(),
            first_name: Some("A".into()),
            last_name: Some("B".into()),
            account_type: AccountType::Federated,
            enabled: true,
            password_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_overlay_keeps_absent_names() {
        let mut p = principal();
        p.overlay_names(None, Some("C"));
        assert_eq!(p.first_name.as_deref(), Some("A"));
        assert_eq!(p.last_name.as_deref(), Some("C"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email(" JDoe@Example.EDU "), "jdoe@example.edu");
        assert_eq!(normalize_email("jdoe@example.edu"), "jdoe@example.edu");
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let mut p = principal();
        p.password_hash = Some("$argon2id$v=19$...".into());
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn test_account_type_round_trip() {
        for t in [AccountType::Local, AccountType::Federated] {
            assert_eq!(AccountType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(AccountType::from_str("admin"), None);
    }

    #[test]
    fn test_create_principal_rejects_bad_email() {
        let create = CreatePrincipal::federated("not-an-email", None, None);
        assert!(create.validate().is_err());
        assert!(!create.enabled);
    }
}
