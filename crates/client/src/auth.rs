//! Persisted auth token storage
//!
//! The token is written at login by the host application and read here both by
//! the HTTP client (bearer header on every request) and by the realtime setup.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ClientResult;

/// Read/write access to the persisted auth token
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns the stored token, or `None` when the user is signed out
    async fn load_token(&self) -> Option<String>;

    async fn store_token(&self, token: &str) -> ClientResult<()>;

    async fn clear_token(&self) -> ClientResult<()>;
}

/// Token store kept in memory; used by tests and embedders that own persistence
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    token: Arc<RwLock<Option<String>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(Some(token.into()))),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    async fn store_token(&self, token: &str) -> ClientResult<()> {
        *self.token.write().await = Some(token.to_string());
        Ok(())
    }

    async fn clear_token(&self) -> ClientResult<()> {
        *self.token.write().await = None;
        Ok(())
    }
}

/// Token store backed by a single file on disk
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load_token(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::error!(error = %e, path = %self.path.display(), "Failed to read auth token");
                None
            }
        }
    }

    async fn store_token(&self, token: &str) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, token).await?;
        Ok(())
    }

    async fn clear_token(&self) -> ClientResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
