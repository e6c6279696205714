//! Token persistence.

use super::Credential;
use crate::errors::{GitHubError, GitHubResult};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Default token file name.
pub const DEFAULT_TOKEN_FILE: &str = "tokens.json";

/// Opaque key/value store for the credential pair.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Loads the stored credential, if any.
    async fn load(&self) -> GitHubResult<Option<Credential>>;

    /// Persists the credential, replacing any previous one.
    async fn save(&self, credential: &Credential) -> GitHubResult<()>;

    /// Removes the stored credential.
    async fn clear(&self) -> GitHubResult<()>;
}

/// On-disk representation.
#[derive(Debug, Serialize, Deserialize)]
struct StoredTokens {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl From<&Credential> for StoredTokens {
    fn from(credential: &Credential) -> Self {
        Self {
            access_token: credential.access_token.expose_secret().clone(),
            refresh_token: credential
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().clone()),
        }
    }
}

impl From<StoredTokens> for Credential {
    fn from(stored: StoredTokens) -> Self {
        Self {
            access_token: SecretString::new(stored.access_token),
            refresh_token: stored.refresh_token.map(SecretString::new),
        }
    }
}

/// JSON file storage (`{"access_token": .., "refresh_token": ..}`).
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    /// Creates storage backed by the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Gets the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileTokenStorage {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_FILE)
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn load(&self) -> GitHubResult<Option<Credential>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GitHubError::file(format!(
                    "Failed to read token file {}",
                    self.path.display()
                ))
                .with_cause(e))
            }
        };

        let stored: StoredTokens = serde_json::from_slice(&raw).map_err(|e| {
            GitHubError::file(format!("Token file {} is corrupt", self.path.display()))
                .with_cause(e)
        })?;
        Ok(Some(stored.into()))
    }

    async fn save(&self, credential: &Credential) -> GitHubResult<()> {
        let body = serde_json::to_vec_pretty(&StoredTokens::from(credential))
            .map_err(|e| GitHubError::deserialization("Failed to encode tokens").with_cause(e))?;
        write_private(&self.path, &body).await.map_err(|e| {
            GitHubError::file(format!("Failed to write token file {}", self.path.display()))
                .with_cause(e)
        })
    }

    async fn clear(&self) -> GitHubResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GitHubError::file(format!(
                "Failed to remove token file {}",
                self.path.display()
            ))
            .with_cause(e)),
        }
    }
}

/// Writes `body`, keeping the file readable by the owner only on unix.
async fn write_private(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    // `mode` only applies on creation; tighten files that already existed.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    file.write_all(body).await?;
    file.flush().await
}

/// In-memory storage, for tests and hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct InMemoryTokenStorage {
    tokens: Mutex<Option<Credential>>,
}

impl InMemoryTokenStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage holding a credential.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            tokens: Mutex::new(Some(credential)),
        }
    }
}

#[async_trait]
impl TokenStorage for InMemoryTokenStorage {
    async fn load(&self) -> GitHubResult<Option<Credential>> {
        Ok(self.tokens.lock().await.clone())
    }

    async fn save(&self, credential: &Credential) -> GitHubResult<()> {
        *self.tokens.lock().await = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> GitHubResult<()> {
        *self.tokens.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GitHubErrorKind;

    #[tokio::test]
    async fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::new(dir.path().join("tokens.json"));

        assert!(storage.load().await.unwrap().is_none());

        storage
            .save(&Credential::new("gho_access").with_refresh_token("ghr_refresh"))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(storage.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["access_token"], "gho_access");
        assert_eq!(json["refresh_token"], "ghr_refresh");

        let loaded = storage.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token.expose_secret(), "gho_access");
        assert_eq!(
            loaded.refresh_token.unwrap().expose_secret(),
            "ghr_refresh"
        );

        storage.clear().await.unwrap();
        assert!(storage.load().await.unwrap().is_none());
        storage.clear().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fresh = FileTokenStorage::new(dir.path().join("fresh.json"));
        fresh.save(&Credential::new("gho_access")).await.unwrap();
        let mode = std::fs::metadata(fresh.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let existing = dir.path().join("existing.json");
        std::fs::write(&existing, b"{}").unwrap();
        std::fs::set_permissions(&existing, std::fs::Permissions::from_mode(0o644)).unwrap();
        FileTokenStorage::new(&existing)
            .save(&Credential::new("gho_access"))
            .await
            .unwrap();
        let mode = std::fs::metadata(&existing).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = FileTokenStorage::new(path).load().await.unwrap_err();
        assert_eq!(err.kind(), GitHubErrorKind::FileError);
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = InMemoryTokenStorage::new();
        storage.save(&Credential::new("a")).await.unwrap();
        assert!(storage.load().await.unwrap().is_some());
        storage.clear().await.unwrap();
        assert!(storage.load().await.unwrap().is_none());
    }
}
