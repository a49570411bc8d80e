//! # redb-backed Document Storage
//!
//! A disk-backed document store using the redb embedded database.
//!
//! - One table per entity kind: `id -> (version, postcard bytes)`
//! - One shared index table: `(index, key, id) -> ()`
//! - A metadata table carrying the on-disk format version
//!
//! Every [`WriteOp`] runs in a single redb write transaction, so the version
//! check, the unique-index check, the document and its index rows commit
//! together or not at all. redb allows one writer at a time, which makes
//! the compare-and-swap race-free; readers use MVCC snapshots and never
//! block the writer.

use crate::index::IndexKey;
use crate::store::{DocumentBackend, RawDocument, WriteOp};
use crate::{EntityKind, VaultError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;

type DocumentTable = TableDefinition<'static, &'static str, (u64, &'static [u8])>;

const USERS: DocumentTable = TableDefinition::new("users");
const MODELS: DocumentTable = TableDefinition::new("models");
const COMPARISONS: DocumentTable = TableDefinition::new("comparisons");
const EXPLAINABILITY: DocumentTable = TableDefinition::new("explainability_analyses");
const FAIRNESS: DocumentTable = TableDefinition::new("fairness_analyses");
const ACTIVITIES: DocumentTable = TableDefinition::new("user_activities");

/// Table for secondary indexes: (index name, key, document id) -> marker
const INDEXES: TableDefinition<(&str, &str, &str), u8> = TableDefinition::new("indexes");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// Bumped whenever the table layout or document encoding changes.
const FORMAT_VERSION: u64 = 1;

fn documents(kind: EntityKind) -> DocumentTable {
    match kind {
        EntityKind::User => USERS,
        EntityKind::Model => MODELS,
        EntityKind::Comparison => COMPARISONS,
        EntityKind::Explainability => EXPLAINABILITY,
        EntityKind::Fairness => FAIRNESS,
        EntityKind::Activity => ACTIVITIES,
    }
}

fn io_err(e: impl std::fmt::Display) -> VaultError {
    VaultError::IoError(e.to_string())
}

/// A disk-backed document store.
pub struct RedbBackend {
    db: Database,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend").finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open or create a store at the given path.
    ///
    /// # Errors
    ///
    /// `IoError` if the file cannot be opened or was written by an
    /// incompatible format version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        let write_txn = db.begin_write().map_err(io_err)?;
        {
            for kind in EntityKind::ALL {
                let _ = write_txn.open_table(documents(kind)).map_err(io_err)?;
            }
            let _ = write_txn.open_table(INDEXES).map_err(io_err)?;
            let mut meta = write_txn.open_table(METADATA).map_err(io_err)?;
            let stored = meta
                .get("format_version")
                .map_err(io_err)?
                .map(|v| v.value());
            match stored {
                None => {
                    meta.insert("format_version", FORMAT_VERSION).map_err(io_err)?;
                }
                Some(v) if v == FORMAT_VERSION => {}
                Some(v) => {
                    return Err(VaultError::IoError(format!(
                        "store format {v} is not supported (expected {FORMAT_VERSION})"
                    )));
                }
            }
        }
        write_txn.commit().map_err(io_err)?;
        tracing::debug!(path = %path.as_ref().display(), "redb store opened");

        Ok(Self { db })
    }
}

impl DocumentBackend for RedbBackend {
    fn load(&self, kind: EntityKind, id: &str) -> Result<Option<RawDocument>, VaultError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(documents(kind)).map_err(io_err)?;
        let doc = table.get(id).map_err(io_err)?.map(|guard| {
            let (version, bytes) = guard.value();
            RawDocument {
                version,
                bytes: bytes.to_vec(),
            }
        });
        Ok(doc)
    }

    fn commit(&self, op: WriteOp) -> Result<(), VaultError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut docs = write_txn.open_table(documents(op.kind)).map_err(io_err)?;
            let mut indexes = write_txn.open_table(INDEXES).map_err(io_err)?;

            let found = docs
                .get(op.id.as_str())
                .map_err(io_err)?
                .map_or(0, |guard| guard.value().0);
            if found != op.expected_version {
                return Err(VaultError::Conflict {
                    kind: op.kind,
                    id: op.id.clone(),
                    expected: op.expected_version,
                    found,
                });
            }

            for entry in op.add.iter().filter(|e| e.index.is_unique()) {
                let name = entry.index.name();
                for row in indexes.range((name, entry.key.as_str(), "")..).map_err(io_err)? {
                    let (key, _) = row.map_err(io_err)?;
                    let (index, value, owner) = key.value();
                    if index != name || value != entry.key {
                        break;
                    }
                    if owner != op.id {
                        return Err(VaultError::validation(
                            name,
                            format!("`{}` already used by {}", entry.key, owner),
                        ));
                    }
                }
            }

            for entry in &op.remove {
                indexes
                    .remove((entry.index.name(), entry.key.as_str(), op.id.as_str()))
                    .map_err(io_err)?;
            }
            for entry in &op.add {
                indexes
                    .insert((entry.index.name(), entry.key.as_str(), op.id.as_str()), 0u8)
                    .map_err(io_err)?;
            }
            match &op.document {
                Some(doc) => {
                    docs.insert(op.id.as_str(), (doc.version, doc.bytes.as_slice()))
                        .map_err(io_err)?;
                }
                None => {
                    docs.remove(op.id.as_str()).map_err(io_err)?;
                }
            }
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }

    fn scan(&self, kind: EntityKind) -> Result<Vec<RawDocument>, VaultError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(documents(kind)).map_err(io_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(io_err)? {
            let (_, value) = row.map_err(io_err)?;
            let (version, bytes) = value.value();
            out.push(RawDocument {
                version,
                bytes: bytes.to_vec(),
            });
        }
        Ok(out)
    }

    fn count(&self, kind: EntityKind) -> Result<usize, VaultError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(documents(kind)).map_err(io_err)?;
        Ok(table.len().map_err(io_err)? as usize)
    }

    fn index_lookup(&self, index: IndexKey, key: &str) -> Result<Vec<String>, VaultError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(INDEXES).map_err(io_err)?;
        let name = index.name();
        let mut ids = Vec::new();
        for row in table.range((name, key, "")..).map_err(io_err)? {
            let (k, _) = row.map_err(io_err)?;
            let (i, value, owner) = k.value();
            if i != name || value != key {
                break;
            }
            ids.push(owner.to_string());
        }
        Ok(ids)
    }

    fn index_prefix(&self, index: IndexKey, prefix: &str) -> Result<Vec<(String, String)>, VaultError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(INDEXES).map_err(io_err)?;
        let name = index.name();
        let mut rows = Vec::new();
        for row in table.range((name, prefix, "")..).map_err(io_err)? {
            let (k, _) = row.map_err(io_err)?;
            let (i, value, owner) = k.value();
            if i != name || !value.starts_with(prefix) {
                break;
            }
            rows.push((value.to_string(), owner.to_string()));
        }
        Ok(rows)
    }
}
