use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::backend::StoredSession;
use crate::error::StorageResult;

/// On-disk home of the reduced session payload.
#[derive(Debug, Clone)]
pub struct SessionVault {
    path: PathBuf,
}

impl SessionVault {
    /// Vault persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File backing the vault.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored session, if any. An unreadable file counts as no session.
    pub async fn load(&self) -> StorageResult<Option<StoredSession>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable session file");
                Ok(None)
            }
        }
    }

    /// Persist `session`, readable by the owner only.
    pub async fn save(&self, session: &StoredSession) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let body = serde_json::to_vec_pretty(session).map_err(std::io::Error::from)?;
        tokio::fs::write(&self.path, body).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        debug!(path = %self.path.display(), "Session saved");
        Ok(())
    }

    /// Forget the stored session. Missing files are fine.
    pub async fn clear(&self) -> StorageResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SessionUser;

    fn session() -> StoredSession {
        StoredSession {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Some(4_102_444_800),
            token_type: Some("bearer".to_string()),
            user: SessionUser {
                id: "u-1".to_string(),
                email: Some("ana@example.com".to_string()),
                user_metadata: Some(serde_json::json!({"full_name": "Ana"})),
            },
        }
    }

    #[tokio::test]
    async fn test_vault_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let vault = SessionVault::new(dir.path().join("nested").join("session.json"));

        assert!(vault.load().await.unwrap().is_none());

        vault.save(&session()).await.unwrap();
        assert_eq!(vault.load().await.unwrap(), Some(session()));

        vault.clear().await.unwrap();
        assert!(vault.load().await.unwrap().is_none());
        vault.clear().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_vault_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let vault = SessionVault::new(dir.path().join("session.json"));
        vault.save(&session()).await.unwrap();

        let mode = std::fs::metadata(vault.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_vault_corrupt_file_is_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{broken").unwrap();

        let vault = SessionVault::new(path);
        assert!(vault.load().await.unwrap().is_none());
    }
}
