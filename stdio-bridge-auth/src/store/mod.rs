mod file;

pub use file::FileCredentialStore;

use dashmap::DashMap;
use std::path::PathBuf;

use crate::common::{AccountId, CredentialRecord};
use crate::error::AuthError;

/// Durable storage of one credential record per account.
///
/// Records are keyed by `record.account_id`, which is already canonical, so
/// a record can never be stored under two casings of the same id.
pub trait CredentialStore: Send + Sync {
    fn get(&self, account_id: &AccountId) -> Result<Option<CredentialRecord>, AuthError>;

    fn put(&self, record: &CredentialRecord) -> Result<(), AuthError>;

    /// Remove the record. Deleting a missing record is not an error.
    fn delete(&self, account_id: &AccountId) -> Result<(), AuthError>;

    /// Where the record lives on disk, for collaborators that read it directly.
    fn location(&self, _account_id: &AccountId) -> Option<PathBuf> {
        None
    }
}

/// In-memory store, for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: DashMap<AccountId, CredentialRecord>,
}

impl MemoryCredentialStore {
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

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, account_id: &AccountId) -> Result<Option<CredentialRecord>, AuthError> {
        Ok(self.records.get(account_id).map(|r| r.clone()))
    }

    fn put(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        self.records
            .insert(record.account_id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, account_id: &AccountId) -> Result<(), AuthError> {
        self.records.remove(account_id);
        Ok(())
    }
}
