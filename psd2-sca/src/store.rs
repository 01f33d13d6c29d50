//! Authorisation record storage
//!
//! [`AuthorisationStore`] is the repository contract the service persists
//! through. Saves are optimistic: a record is written only if the stored copy
//! still has the version the caller loaded, and every successful save bumps
//! the version by one.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::record::AuthorisationRecord;

/// Errors returned by an [`AuthorisationStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record with this id.
    #[error("authorisation not found: {0}")]
    NotFound(String),

    /// The stored record moved on since it was loaded.
    #[error("concurrent conflict on authorisation {id}: expected version {expected_version}")]
    Conflict { id: String, expected_version: u64 },

    /// A record with this id already exists.
    #[error("authorisation already exists: {0}")]
    AlreadyExists(String),

    /// A backend-specific failure (connection, serialization, etc.).
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Persistence of authorisation records.
#[async_trait]
pub trait AuthorisationStore: Send + Sync {
    /// Store a new record. Its version must be 0; the stored copy has
    /// version 1.
    async fn insert(&self, record: AuthorisationRecord)
        -> Result<AuthorisationRecord, StoreError>;

    async fn load(&self, id: &str) -> Result<AuthorisationRecord, StoreError>;

    /// Replace the stored record if its version still equals
    /// `record.version`. Returns the stored copy with the bumped version.
    async fn save(&self, record: AuthorisationRecord) -> Result<AuthorisationRecord, StoreError>;
}

/// Process-local store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryAuthorisationStore {
    records: DashMap<String, AuthorisationRecord>,
}

impl InMemoryAuthorisationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AuthorisationStore for InMemoryAuthorisationStore {
    async fn insert(
        &self,
        mut record: AuthorisationRecord,
    ) -> Result<AuthorisationRecord, StoreError> {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(record.id)),
            Entry::Vacant(slot) => {
                record.version = 1;
                slot.insert(record.clone());
                debug!("Inserted authorisation {}", record.id);
                Ok(record)
            }
        }
    }

    async fn load(&self, id: &str) -> Result<AuthorisationRecord, StoreError> {
        self.records
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save(
        &self,
        mut record: AuthorisationRecord,
    ) -> Result<AuthorisationRecord, StoreError> {
        match self.records.entry(record.id.clone()) {
            Entry::Vacant(_) => Err(StoreError::NotFound(record.id)),
            Entry::Occupied(mut stored) => {
                if stored.get().version != record.version {
                    return Err(StoreError::Conflict {
                        id: record.id,
                        expected_version: record.version,
                    });
                }
                record.version += 1;
                stored.insert(record.clone());
                Ok(record)
            }
        }
    }
}
