use super::Document;
use crate::index::{IndexEntry, IndexKey, email_key};
use crate::validation::{self, ValidationPolicy};
use crate::{EntityKind, UserId, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-user display and notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub default_tracking_uri: Option<String>,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

fn default_theme() -> String {
    "light".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            default_tracking_uri: None,
            theme: default_theme(),
            notifications_enabled: true,
        }
    }
}

/// A registered user. Never hard-deleted while referenced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub preferences: UserPreferences,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A new user with default preferences and no roles.
    #[must_use]
    pub fn new(
        user_id: impl Into<UserId>,
        email: impl Into<String>,
        name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            name: name.into(),
            preferences: UserPreferences::default(),
            roles: BTreeSet::new(),
            created_at: at,
            last_login: None,
            updated_at: at,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }
}

impl Document for User {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> &str {
        self.user_id.as_str()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn validate(&mut self, _policy: &ValidationPolicy) -> Result<(), VaultError> {
        validation::check_id("user_id", self.user_id.as_str())?;
        validation::check_email(&self.email)?;
        self.email = self.email.trim().to_string();
        validation::check_label("name", &self.name)?;
        validation::check_label("preferences.theme", &self.preferences.theme)?;
        if let Some(uri) = &self.preferences.default_tracking_uri {
            validation::check_text("preferences.default_tracking_uri", uri)?;
        }
        for role in &self.roles {
            validation::check_label("roles", role)?;
        }
        if let Some(login) = self.last_login {
            if login < self.created_at {
                return Err(VaultError::validation(
                    "last_login",
                    "precedes account creation",
                ));
            }
        }
        validation::check_timestamps(self.created_at, self.updated_at)
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(IndexKey::UserEmail, email_key(&self.email))]
    }
}
