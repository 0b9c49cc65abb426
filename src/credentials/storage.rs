//! Single-slot JSON file storage for the KimVan token.

use super::StoredToken;
use crate::persist;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Token store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no token stored")]
    NotFound,
    #[error("token store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("token store is corrupt: {0}")]
    Corrupt(serde_json::Error),
    #[error("failed to encode token: {0}")]
    Encode(serde_json::Error),
}

/// File-backed storage for one [`StoredToken`].
///
/// # Concurrency
/// Writes and deletes are serialised through an async mutex and land via
/// temp-file + rename, so a reader sees either the old or the new document.
/// Separate processes sharing the file are not coordinated.
pub struct TokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the stored token.
    pub async fn save(&self, token: &StoredToken) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(token).map_err(StoreError::Encode)?;

        let _guard = self.write_lock.lock().await;
        persist::write_atomic(&self.path, json.as_bytes()).await?;

        debug!(
            path = %self.path.display(),
            token_type = token.token_type.as_str(),
            "Token saved"
        );
        Ok(())
    }

    /// Read the stored token.
    ///
    /// # Returns
    /// * `Err(StoreError::NotFound)` - No token file
    /// * `Err(StoreError::Corrupt)` - File exists but is not a token document
    pub async fn load(&self) -> Result<StoredToken, StoreError> {
        let contents = persist::read_optional(&self.path)
            .await?
            .ok_or(StoreError::NotFound)?;

        serde_json::from_str(&contents).map_err(StoreError::Corrupt)
    }

    /// Remove the stored token. `NotFound` when there was nothing to remove.
    pub async fn delete(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Token deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    pub fn is_valid(token: &StoredToken) -> bool {
        token.is_valid_at(Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{TokenType, DAY_MS};
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, TokenStore) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = TokenStore::new(dir.path().join("kimvan-token.json"));
        (dir, store)
    }

    fn create_test_token() -> StoredToken {
        let now = Utc::now().timestamp_millis();
        let mut token = StoredToken::new("CCC", TokenType::Session, now, None, 30 * DAY_MS);
        token.csrf_token = Some("AAA".to_string());
        token.callback_url = Some("BBB".to_string());
        token.session_token = Some("CCC".to_string());
        token.refresh_token = Some("refresh-1".to_string());
        token.auth_email = Some("admin@example.com".to_string());
        token.token_expiry_time = Some(now + 3_600_000);
        token
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (_dir, store) = create_test_store();
        let token = create_test_token();

        store.save(&token).await.expect("Failed to save");
        let loaded = store.load().await.expect("Failed to load");

        assert_eq!(loaded, token);
    }

    #[tokio::test]
    async fn test_save_writes_pretty_json() {
        let (_dir, store) = create_test_store();
        store.save(&create_test_token()).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\n  \"value\": \"CCC\""));
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (_dir, store) = create_test_store();
        store.save(&create_test_token()).await.unwrap();

        let replacement = StoredToken::new("eyJa.b.c", TokenType::Jwt, 1, Some(2), DAY_MS);
        store.save(&replacement).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.token_type, TokenType::Jwt);
        assert!(loaded.auth_email.is_none());
    }

    #[tokio::test]
    async fn test_load_missing() {
        let (_dir, store) = create_test_store();
        assert!(matches!(store.load().await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_load_corrupt() {
        let (_dir, store) = create_test_store();
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(store.load().await, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, store) = create_test_store();
        store.save(&create_test_token()).await.unwrap();

        assert!(store.delete().await.is_ok());
        assert!(matches!(store.delete().await, Err(StoreError::NotFound)));
        assert!(matches!(store.delete().await, Err(StoreError::NotFound)));
        assert!(matches!(store.load().await, Err(StoreError::NotFound)));
    }

    #[test]
    fn test_is_valid() {
        let now = Utc::now().timestamp_millis();

        let expired = StoredToken {
            expiry_date: now - 1,
            ..StoredToken::new("v", TokenType::Jwt, now - 10, None, DAY_MS)
        };
        assert!(!TokenStore::is_valid(&expired));

        let fresh = StoredToken::new("v", TokenType::Jwt, now, Some(now + 30 * DAY_MS), DAY_MS);
        assert!(TokenStore::is_valid(&fresh));
    }
}
