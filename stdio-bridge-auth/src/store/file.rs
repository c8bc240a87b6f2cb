use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use super::CredentialStore;
use crate::common::{AccountId, CredentialRecord};
use crate::error::AuthError;

/// One pretty-printed JSON file per account: `<dir>/<account_id>.json`.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let dir = dir.into();

        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to create credential directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        tracing::info!(dir = %dir.display(), "Credential store initialized");
        Ok(Self { dir })
    }

    fn path_for(&self, account_id: &AccountId) -> PathBuf {
        self.dir.join(format!("{}.json", account_id))
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, account_id: &AccountId) -> Result<Option<CredentialRecord>, AuthError> {
        let path = self.path_for(account_id);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthError::Storage(format!(
                    "Failed to read credential {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let record: CredentialRecord = serde_json::from_str(&json)?;
        if &record.account_id != account_id {
            return Err(AuthError::Storage(format!(
                "Credential file {} belongs to account {}",
                path.display(),
                record.account_id
            )));
        }

        Ok(Some(record))
    }

    fn put(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        let path = self.path_for(&record.account_id);
        let tmp_path = self.dir.join(format!(".{}.json.tmp", record.account_id));
        let json = serde_json::to_string_pretty(record)?;

        fs::write(&tmp_path, json)
            .map_err(|e| AuthError::Storage(format!("Failed to write credential: {}", e)))?;

        // Owner read/write only; the file holds live tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600)).map_err(|e| {
                AuthError::Storage(format!("Failed to set credential permissions: {}", e))
            })?;
        }

        fs::rename(&tmp_path, &path)
            .map_err(|e| AuthError::Storage(format!("Failed to replace credential: {}", e)))?;

        tracing::debug!(account_id = %record.account_id, "Credential saved");
        Ok(())
    }

    fn delete(&self, account_id: &AccountId) -> Result<(), AuthError> {
        match fs::remove_file(self.path_for(account_id)) {
            Ok(()) => {
                tracing::debug!(account_id = %account_id, "Credential deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Storage(format!(
                "Failed to delete credential: {}",
                e
            ))),
        }
    }

    fn location(&self, account_id: &AccountId) -> Option<PathBuf> {
        Some(self.path_for(account_id))
    }
}
