use super::Document;
use crate::index::{IndexEntry, IndexKey, compound_key, time_key};
use crate::validation::{self, ValidationPolicy};
use crate::{ActivityId, ActivityKind, EntityKind, UserId, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where an activity came from. Both fields are opaque.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityOrigin {
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// An append-only user event. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActivity {
    pub activity_id: ActivityId,
    pub user_id: UserId,
    pub kind: ActivityKind,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub origin: ActivityOrigin,
}

impl UserActivity {
    #[must_use]
    pub fn new(
        activity_id: ActivityId,
        user_id: UserId,
        kind: ActivityKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            activity_id,
            user_id,
            kind,
            details: BTreeMap::new(),
            timestamp,
            origin: ActivityOrigin::default(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

impl Document for UserActivity {
    const KIND: EntityKind = EntityKind::Activity;

    fn id(&self) -> &str {
        self.activity_id.as_str()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.timestamp
    }

    // The event time is the only timestamp; it never moves.
    fn set_updated_at(&mut self, _at: DateTime<Utc>) {}

    fn validate(&mut self, _policy: &ValidationPolicy) -> Result<(), VaultError> {
        validation::check_id("activity_id", self.activity_id.as_str())?;
        validation::check_id("user_id", self.user_id.as_str())?;
        for (key, value) in &self.details {
            validation::check_label("details", key)?;
            validation::check_text(&format!("details.{key}"), value)?;
        }
        if let Some(ip) = &self.origin.ip_address {
            validation::check_label_length("origin.ip_address", ip)?;
        }
        if let Some(agent) = &self.origin.user_agent {
            validation::check_text("origin.user_agent", agent)?;
        }
        Ok(())
    }

    fn check_transition(_previous: &Self, _next: &Self) -> Result<(), VaultError> {
        Err(VaultError::validation("activity", "activities are append-only"))
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        let at = time_key(self.timestamp);
        vec![
            IndexEntry::new(
                IndexKey::ActivityUserTime,
                compound_key(&[self.user_id.as_str(), &at]),
            ),
            IndexEntry::new(
                IndexKey::ActivityKind,
                compound_key(&[self.kind.as_str(), &at]),
            ),
        ]
    }
}
