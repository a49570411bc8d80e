//! # In-memory Backend
//!
//! BTreeMap tables behind a single `RwLock`. Volatile; used by tests and by
//! sessions that do not need persistence.

use crate::index::IndexKey;
use crate::store::{DocumentBackend, RawDocument, WriteOp};
use crate::{EntityKind, VaultError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    documents: BTreeMap<(EntityKind, String), RawDocument>,
    /// `(index, key, document id)`
    indexes: BTreeSet<(IndexKey, String, String)>,
}

impl Tables {
    /// Rows under exactly `(index, key)`.
    fn rows<'a>(&'a self, index: IndexKey, key: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.indexes
            .range((index, key.to_string(), String::new())..)
            .take_while(move |(i, k, _)| *i == index && k == key)
            .map(|(_, _, id)| id)
    }
}

/// Volatile document backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, VaultError> {
        self.tables
            .read()
            .map_err(|_| VaultError::IoError("memory backend lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, VaultError> {
        self.tables
            .write()
            .map_err(|_| VaultError::IoError("memory backend lock poisoned".to_string()))
    }
}

impl DocumentBackend for MemoryBackend {
    fn load(&self, kind: EntityKind, id: &str) -> Result<Option<RawDocument>, VaultError> {
        Ok(self.read()?.documents.get(&(kind, id.to_string())).cloned())
    }

    fn commit(&self, op: WriteOp) -> Result<(), VaultError> {
        let mut tables = self.write()?;
        let slot = (op.kind, op.id.clone());

        let found = tables.documents.get(&slot).map_or(0, |d| d.version);
        if found != op.expected_version {
            return Err(VaultError::Conflict {
                kind: op.kind,
                id: op.id,
                expected: op.expected_version,
                found,
            });
        }
        for entry in op.add.iter().filter(|e| e.index.is_unique()) {
            if let Some(owner) = tables.rows(entry.index, &entry.key).find(|owner| **owner != op.id) {
                return Err(VaultError::validation(
                    entry.index.name(),
                    format!("`{}` already used by {}", entry.key, owner),
                ));
            }
        }

        for entry in op.remove {
            tables.indexes.remove(&(entry.index, entry.key, op.id.clone()));
        }
        for entry in op.add {
            tables.indexes.insert((entry.index, entry.key, op.id.clone()));
        }
        match op.document {
            Some(doc) => {
                tables.documents.insert(slot, doc);
            }
            None => {
                tables.documents.remove(&slot);
            }
        }
        Ok(())
    }

    fn scan(&self, kind: EntityKind) -> Result<Vec<RawDocument>, VaultError> {
        Ok(self
            .read()?
            .documents
            .range((kind, String::new())..)
            .take_while(|((k, _), _)| *k == kind)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    fn count(&self, kind: EntityKind) -> Result<usize, VaultError> {
        Ok(self
            .read()?
            .documents
            .keys()
            .filter(|(k, _)| *k == kind)
            .count())
    }

    fn index_lookup(&self, index: IndexKey, key: &str) -> Result<Vec<String>, VaultError> {
        Ok(self.read()?.rows(index, key).cloned().collect())
    }

    fn index_prefix(&self, index: IndexKey, prefix: &str) -> Result<Vec<(String, String)>, VaultError> {
        Ok(self
            .read()?
            .indexes
            .range((index, prefix.to_string(), String::new())..)
            .take_while(|(i, k, _)| *i == index && k.starts_with(prefix))
            .map(|(_, k, id)| (k.clone(), id.clone()))
            .collect())
    }
}
