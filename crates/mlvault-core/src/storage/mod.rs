//! # Storage Backends
//!
//! Two implementations of [`DocumentBackend`]:
//! - `InMemory`: [`MemoryBackend`] (fast, volatile)
//! - `Persistent`: [`RedbBackend`] (disk-backed ACID storage)
//!
//! [`StorageBackend`] wraps either one so that callers pick the backend at
//! runtime while the store stays monomorphic.

mod memory;
mod redb_store;

pub use memory::MemoryBackend;
pub use redb_store::RedbBackend;

use crate::index::IndexKey;
use crate::store::{DocumentBackend, RawDocument, WriteOp};
use crate::{EntityKind, VaultError};
use std::path::Path;

/// Runtime choice of backend.
#[derive(Debug)]
pub enum StorageBackend {
    InMemory(MemoryBackend),
    Persistent(RedbBackend),
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::InMemory(MemoryBackend::new())
    }
}

impl StorageBackend {
    /// Open a redb-backed store at `path`.
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        Ok(StorageBackend::Persistent(RedbBackend::open(path)?))
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, StorageBackend::Persistent(_))
    }
}

impl DocumentBackend for StorageBackend {
    fn load(&self, kind: EntityKind, id: &str) -> Result<Option<RawDocument>, VaultError> {
        match self {
            StorageBackend::InMemory(b) => b.load(kind, id),
            StorageBackend::Persistent(b) => b.load(kind, id),
        }
    }

    fn commit(&self, op: WriteOp) -> Result<(), VaultError> {
        match self {
            StorageBackend::InMemory(b) => b.commit(op),
            StorageBackend::Persistent(b) => b.commit(op),
        }
    }

    fn scan(&self, kind: EntityKind) -> Result<Vec<RawDocument>, VaultError> {
        match self {
            StorageBackend::InMemory(b) => b.scan(kind),
            StorageBackend::Persistent(b) => b.scan(kind),
        }
    }

    fn count(&self, kind: EntityKind) -> Result<usize, VaultError> {
        match self {
            StorageBackend::InMemory(b) => b.count(kind),
            StorageBackend::Persistent(b) => b.count(kind),
        }
    }

    fn index_lookup(&self, index: IndexKey, key: &str) -> Result<Vec<String>, VaultError> {
        match self {
            StorageBackend::InMemory(b) => b.index_lookup(index, key),
            StorageBackend::Persistent(b) => b.index_lookup(index, key),
        }
    }

    fn index_prefix(&self, index: IndexKey, prefix: &str) -> Result<Vec<(String, String)>, VaultError> {
        match self {
            StorageBackend::InMemory(b) => b.index_prefix(index, prefix),
            StorageBackend::Persistent(b) => b.index_prefix(index, prefix),
        }
    }
}
