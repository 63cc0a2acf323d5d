use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Marks a login that produced cookies but no bearer token.
pub const SESSION_ACTIVE: &str = "SESSION_ACTIVE";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenFile {
    token: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Clinicorp token persisted between restarts.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn save(&self, token: &str, expires_in: Option<u64>) -> Result<()> {
        let now = Utc::now();
        let record = TokenFile {
            token: token.to_string(),
            created_at: now,
            expires_at: expires_in.map(|secs| now + Duration::seconds(secs as i64)),
            expires_in,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create token dir {}", parent.display()))?;
        }

        let body = serde_json::to_string_pretty(&record)?;
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("Failed to write token file {}", self.path.display()))?;
        info!(path = %self.path.display(), "token saved");
        Ok(())
    }

    /// The stored token, unless missing, unreadable or expired.
    pub async fn load(&self) -> Option<String> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "cannot read token file");
                return None;
            }
        };

        let record: TokenFile = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "corrupt token file");
                return None;
            }
        };

        if record.token.trim().is_empty() {
            return None;
        }
        if let Some(expires_at) = record.expires_at {
            if Utc::now() >= expires_at {
                info!(%expires_at, "stored token expired");
                return None;
            }
        }
        Some(record.token)
    }

    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "token removed");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to remove token file {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested/token.json"));
        assert!(store.load().await.is_none());

        store.save("abc.def.ghi", Some(3600)).await.unwrap();
        assert_eq!(store.load().await.as_deref(), Some("abc.def.ghi"));

        store.delete().await.unwrap();
        assert!(store.load().await.is_none());
        store.delete().await.unwrap();
    }

    #[tokio::test]
    async fn missing_expiry_never_expires() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store.save(SESSION_ACTIVE, None).await.unwrap();
        assert_eq!(store.load().await.as_deref(), Some(SESSION_ACTIVE));
    }

    #[tokio::test]
    async fn expired_and_corrupt_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let store = TokenStore::new(&path);

        let expired = serde_json::json!({
            "token": "old",
            "created_at": "2020-01-01T00:00:00Z",
            "expires_at": "2020-01-02T00:00:00Z",
            "expires_in": 86400
        });
        std::fs::write(&path, expired.to_string()).unwrap();
        assert!(store.load().await.is_none());

        std::fs::write(&path, "{not json").unwrap();
        assert!(store.load().await.is_none());
    }
}
