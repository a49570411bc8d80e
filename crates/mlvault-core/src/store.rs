//! # Entity Store
//!
//! Typed, versioned, schema-validated persistence over a raw document
//! backend.
//!
//! ## Write Path
//!
//! Every write goes through the same steps:
//! 1. Transition rules (`Document::check_transition`) on updates
//! 2. Schema validation (`Document::validate`)
//! 3. Index diff between the old and new document
//! 4. One atomic backend commit guarded by the expected version
//!
//! A failing step leaves the stored document untouched. Versions start at 1
//! and increase by exactly 1 per successful write.
//!
//! ## Backends
//!
//! [`DocumentBackend`] is the only seam to the storage engine. It knows
//! nothing about entity types: it stores opaque bytes under
//! `(kind, id)` with a version, plus index rows. See [`crate::storage`] for
//! the in-memory and redb implementations.

use crate::entities::Document;
use crate::index::{IndexEntry, IndexKey};
use crate::validation::ValidationPolicy;
use crate::{EntityKind, Versioned, VaultError};
use chrono::Utc;
use std::collections::BTreeSet;

// =============================================================================
// BACKEND CONTRACT
// =============================================================================

/// Encoded document bytes with their version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub version: u64,
    pub bytes: Vec<u8>,
}

/// A single-document write, applied atomically with its index rows.
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub kind: EntityKind,
    pub id: String,
    /// Version the stored document must have. `0` means it must not exist.
    pub expected_version: u64,
    /// New document, or `None` to delete it.
    pub document: Option<RawDocument>,
    pub remove: Vec<IndexEntry>,
    pub add: Vec<IndexEntry>,
}

/// Raw storage engine.
///
/// Implementations must apply a [`WriteOp`] atomically: either the version
/// check, the unique-index check, the document and every index row succeed
/// together, or nothing changes.
pub trait DocumentBackend: Send + Sync {
    /// Load a document by kind and id.
    fn load(&self, kind: EntityKind, id: &str) -> Result<Option<RawDocument>, VaultError>;

    /// Apply a write.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the stored version differs from `expected_version`
    /// - `Validation` if an added unique index row belongs to another document
    fn commit(&self, op: WriteOp) -> Result<(), VaultError>;

    /// All documents of a kind, ordered by id.
    fn scan(&self, kind: EntityKind) -> Result<Vec<RawDocument>, VaultError>;

    /// Number of documents of a kind.
    fn count(&self, kind: EntityKind) -> Result<usize, VaultError>;

    /// Ids stored under an exact index key, ordered by id.
    fn index_lookup(&self, index: IndexKey, key: &str) -> Result<Vec<String>, VaultError>;

    /// `(key, id)` rows whose key starts with `prefix`, in ascending key order.
    fn index_prefix(&self, index: IndexKey, prefix: &str) -> Result<Vec<(String, String)>, VaultError>;
}

/// Outcome of a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Write the mutated document.
    Apply,
    /// Leave the document as it is.
    Skip,
}

/// Result of [`EntityStore::update_with_retry`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome<T> {
    Applied(Versioned<T>),
    Unchanged(Versioned<T>),
}

impl<T> UpdateOutcome<T> {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }

    pub fn into_versioned(self) -> Versioned<T> {
        match self {
            UpdateOutcome::Applied(v) | UpdateOutcome::Unchanged(v) => v,
        }
    }
}

// =============================================================================
// TYPED STORE
// =============================================================================

/// Typed access to all document kinds over one backend.
#[derive(Debug)]
pub struct EntityStore<B> {
    backend: B,
    policy: ValidationPolicy,
}

impl<B: DocumentBackend> EntityStore<B> {
    /// Create a store with the default validation policy.
    pub fn new(backend: B) -> Self {
        Self::with_policy(backend, ValidationPolicy::default())
    }

    pub fn with_policy(backend: B, policy: ValidationPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    fn encode<T: Document>(doc: &T) -> Result<Vec<u8>, VaultError> {
        postcard::to_allocvec(doc).map_err(|e| VaultError::SerializationError(e.to_string()))
    }

    fn decode<T: Document>(raw: RawDocument) -> Result<Versioned<T>, VaultError> {
        let value: T =
            postcard::from_bytes(&raw.bytes).map_err(|e| VaultError::SerializationError(e.to_string()))?;
        Ok(Versioned::new(raw.version, value))
    }

    /// Insert a new document at version 1.
    ///
    /// # Errors
    ///
    /// `Validation` on schema violation or unique-index collision,
    /// `Conflict` if a document with the same id exists.
    pub fn put<T: Document>(&self, mut doc: T) -> Result<Versioned<T>, VaultError> {
        doc.validate(&self.policy)?;
        let op = WriteOp {
            kind: T::KIND,
            id: doc.id().to_string(),
            expected_version: 0,
            document: Some(RawDocument {
                version: 1,
                bytes: Self::encode(&doc)?,
            }),
            remove: Vec::new(),
            add: doc.index_entries(),
        };
        self.backend.commit(op)?;
        tracing::debug!(kind = %T::KIND, id = doc.id(), "document created");
        Ok(Versioned::new(1, doc))
    }

    /// Fetch a document with its version.
    pub fn get<T: Document>(&self, id: &str) -> Result<Option<Versioned<T>>, VaultError> {
        self.backend
            .load(T::KIND, id)?
            .map(Self::decode)
            .transpose()
    }

    /// Fetch a document, failing with `NotFound` if absent.
    pub fn require<T: Document>(&self, id: &str) -> Result<Versioned<T>, VaultError> {
        self.get(id)?
            .ok_or_else(|| VaultError::not_found(T::KIND, id))
    }

    /// Apply `mutation` if the stored version equals `expected_version`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Conflict` on a version mismatch, `Validation` from the
    /// transition and schema checks, or whatever `mutation` returns.
    pub fn update<T, F>(&self, id: &str, expected_version: u64, mutation: F) -> Result<Versioned<T>, VaultError>
    where
        T: Document,
        F: FnOnce(&mut T) -> Result<(), VaultError>,
    {
        let current = self.require::<T>(id)?;
        if current.version != expected_version {
            return Err(VaultError::Conflict {
                kind: T::KIND,
                id: id.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }
        let mut next = current.value.clone();
        mutation(&mut next)?;
        self.commit_update(id, current.version, &current.value, next)
    }

    /// Re-read-and-retry loop for callers that may lose a version race.
    ///
    /// `mutation` runs against a fresh read on every attempt and decides
    /// whether anything needs writing. Conflicts are retried up to
    /// `attempts` times; every other error is returned at once.
    pub fn update_with_retry<T, F>(&self, id: &str, attempts: u32, mut mutation: F) -> Result<UpdateOutcome<T>, VaultError>
    where
        T: Document,
        F: FnMut(&mut T) -> Result<Step, VaultError>,
    {
        let attempts = attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.require::<T>(id)?;
            let mut next = current.value.clone();
            if mutation(&mut next)? == Step::Skip {
                return Ok(UpdateOutcome::Unchanged(current));
            }
            match self.commit_update(id, current.version, &current.value, next) {
                Ok(written) => return Ok(UpdateOutcome::Applied(written)),
                Err(VaultError::Conflict { found, .. }) if attempt < attempts => {
                    tracing::warn!(
                        kind = %T::KIND,
                        id,
                        attempt,
                        read = current.version,
                        found,
                        "version conflict, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn commit_update<T: Document>(&self, id: &str, version: u64, previous: &T, mut next: T) -> Result<Versioned<T>, VaultError> {
        if next.id() != id {
            return Err(VaultError::validation("id", "cannot change after creation"));
        }
        if next.created_at() != previous.created_at() {
            return Err(VaultError::validation("created_at", "cannot change after creation"));
        }
        T::check_transition(previous, &next)?;

        let stamp = Utc::now().max(previous.updated_at()).max(next.created_at());
        next.set_updated_at(stamp);
        next.validate(&self.policy)?;

        let old: BTreeSet<IndexEntry> = previous.index_entries().into_iter().collect();
        let new: BTreeSet<IndexEntry> = next.index_entries().into_iter().collect();
        let op = WriteOp {
            kind: T::KIND,
            id: id.to_string(),
            expected_version: version,
            document: Some(RawDocument {
                version: version + 1,
                bytes: Self::encode(&next)?,
            }),
            remove: old.difference(&new).cloned().collect(),
            add: new.difference(&old).cloned().collect(),
        };
        self.backend.commit(op)?;
        tracing::debug!(kind = %T::KIND, id, version = version + 1, "document updated");
        Ok(Versioned::new(version + 1, next))
    }

    /// Remove a document and its index rows.
    pub fn delete<T: Document>(&self, id: &str, expected_version: u64) -> Result<(), VaultError> {
        let current = self.require::<T>(id)?;
        if current.version != expected_version {
            return Err(VaultError::Conflict {
                kind: T::KIND,
                id: id.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }
        let op = WriteOp {
            kind: T::KIND,
            id: id.to_string(),
            expected_version,
            document: None,
            remove: current.value.index_entries(),
            add: Vec::new(),
        };
        self.backend.commit(op)?;
        tracing::debug!(kind = %T::KIND, id, "document deleted");
        Ok(())
    }

    /// Every document of `T`'s kind, ordered by id.
    pub fn scan<T: Document>(&self) -> Result<Vec<Versioned<T>>, VaultError> {
        self.backend
            .scan(T::KIND)?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    pub fn count(&self, kind: EntityKind) -> Result<usize, VaultError> {
        self.backend.count(kind)
    }

    /// Documents stored under an exact index key.
    pub fn find_by_index<T: Document>(&self, index: IndexKey, key: &str) -> Result<Vec<Versioned<T>>, VaultError> {
        let ids = self.backend.index_lookup(index, key)?;
        self.load_all(ids)
    }

    /// Documents whose index key starts with `prefix`, in key order.
    ///
    /// A row whose document vanished between the index read and the
    /// document read is skipped.
    pub fn find_by_prefix<T: Document>(
        &self,
        index: IndexKey,
        prefix: &str,
    ) -> Result<Vec<(String, Versioned<T>)>, VaultError> {
        let mut out = Vec::new();
        for (key, id) in self.backend.index_prefix(index, prefix)? {
            if let Some(doc) = self.get::<T>(&id)? {
                out.push((key, doc));
            }
        }
        Ok(out)
    }

    fn load_all<T: Document>(&self, ids: Vec<String>) -> Result<Vec<Versioned<T>>, VaultError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.get::<T>(&id)? {
                out.push(doc);
            }
        }
        Ok(out)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::entities::{Model, TrackingRef, User};
    use crate::storage::MemoryBackend;
    use crate::validation::RatePolicy;
    use crate::{ComparisonId, ModelStatus};

    fn store() -> EntityStore<MemoryBackend> {
        EntityStore::new(MemoryBackend::new())
    }

    fn model(id: &str, run: &str) -> Model {
        let tracking = TrackingRef {
            run_id: run.into(),
            experiment_id: "exp_123".into(),
            tracking_uri: "http://localhost:5000".into(),
            artifact_path: "model".into(),
        };
        let mut m = Model::new(id, "ryan_001", tracking, "RandomForest", Utc::now());
        m.metrics.accuracy = Some(0.9018);
        m
    }

    #[test]
    fn put_then_get() {
        let store = store();
        let written = store.put(model("model_12345", "run_001")).unwrap();
        assert_eq!(written.version, 1);
        let read: Versioned<Model> = store.require("model_12345").unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn duplicate_id_conflicts() {
        let store = store();
        store.put(model("model_12345", "run_001")).unwrap();
        let err = store.put(model("model_12345", "run_002")).unwrap_err();
        assert_eq!(err.kind(), "Conflict");
    }

    #[test]
    fn duplicate_email_rejected() {
        let store = store();
        let now = Utc::now();
        store.put(User::new("ryan_001", "ryan@example.com", "Ryan", now)).unwrap();
        let err = store
            .put(User::new("ryan_002", "RYAN@example.com", "Other Ryan", now))
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation { ref field, .. } if field == "users.email"));
        assert_eq!(store.count(EntityKind::User).unwrap(), 1);
    }

    #[test]
    fn stale_version_conflicts() {
        let store = store();
        store.put(model("model_12345", "run_001")).unwrap();
        store
            .update::<Model, _>("model_12345", 1, |m| {
                m.notes = "first".into();
                Ok(())
            })
            .unwrap();
        let err = store
            .update::<Model, _>("model_12345", 1, |m| {
                m.notes = "second".into();
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, VaultError::Conflict { expected: 1, found: 2, .. }));
    }

    #[test]
    fn update_bumps_version_and_timestamp() {
        let store = store();
        let first = store.put(model("model_12345", "run_001")).unwrap();
        let second = store
            .update::<Model, _>("model_12345", 1, |m| {
                m.is_favorite = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(second.version, 2);
        assert!(second.value.updated_at >= first.value.updated_at);
        assert_eq!(second.value.created_at, first.value.created_at);
    }

    #[test]
    fn invalid_update_writes_nothing() {
        let store = store();
        store.put(model("model_12345", "run_001")).unwrap();
        let err = store
            .update::<Model, _>("model_12345", 1, |m| {
                m.metrics.accuracy = Some(1.5);
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        let read: Versioned<Model> = store.require("model_12345").unwrap();
        assert_eq!(read.version, 1);
        assert_eq!(read.value.metrics.accuracy, Some(0.9018));
    }

    #[test]
    fn clamp_policy_rewrites_rates() {
        let store = EntityStore::with_policy(
            MemoryBackend::new(),
            ValidationPolicy {
                rate_metrics: RatePolicy::Clamp,
            },
        );
        let mut m = model("model_12345", "run_001");
        m.metrics.recall = Some(1.02);
        let written = store.put(m).unwrap();
        assert_eq!(written.value.metrics.recall, Some(1.0));
    }

    #[test]
    fn indexes_follow_updates() {
        let store = store();
        store.put(model("model_12345", "run_001")).unwrap();
        store
            .update::<Model, _>("model_12345", 1, |m| {
                m.status = ModelStatus::Archived;
                Ok(())
            })
            .unwrap();
        let active: Vec<Versioned<Model>> = store.find_by_index(IndexKey::ModelStatus, "active").unwrap();
        let archived: Vec<Versioned<Model>> = store.find_by_index(IndexKey::ModelStatus, "archived").unwrap();
        assert!(active.is_empty());
        assert_eq!(archived.len(), 1);
    }

    #[test]
    fn retry_skip_leaves_version() {
        let store = store();
        store.put(model("model_12345", "run_001")).unwrap();
        let comp = ComparisonId::new("comp_1");
        let apply = |m: &mut Model| -> Result<Step, VaultError> {
            Ok(if m.apply_comparison(&comp) {
                Step::Apply
            } else {
                Step::Skip
            })
        };
        let first = store.update_with_retry::<Model, _>("model_12345", 3, apply).unwrap();
        let second = store.update_with_retry::<Model, _>("model_12345", 3, apply).unwrap();
        assert!(first.is_applied());
        assert!(!second.is_applied());
        let read = second.into_versioned();
        assert_eq!(read.version, 2);
        assert_eq!(read.value.comparison_count, 1);
    }

    #[test]
    fn delete_removes_index_rows() {
        let store = store();
        store.put(model("model_12345", "run_001")).unwrap();
        store.delete::<Model>("model_12345", 1).unwrap();
        assert!(store.get::<Model>("model_12345").unwrap().is_none());
        let by_run: Vec<Versioned<Model>> = store.find_by_index(IndexKey::ModelRun, "run_001").unwrap();
        assert!(by_run.is_empty());
        // The run id is free again.
        store.put(model("model_99999", "run_001")).unwrap();
    }

    #[test]
    fn id_cannot_change() {
        let store = store();
        store.put(model("model_12345", "run_001")).unwrap();
        let err = store
            .update::<Model, _>("model_12345", 1, |m| {
                m.model_id = "model_other".into();
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation { ref field, .. } if field == "id"));
    }
}
