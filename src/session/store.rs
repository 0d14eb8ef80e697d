//! Session Storage
//!
//! The durable secret store is consumed through a narrow key/value
//! interface. The full token pair is stored as JSON next to the bare
//! access and refresh tokens so the client identity recorded on it
//! survives restarts.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::oauth::TokenPair;
use crate::{Error, Result};

/// Key holding the bare access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Key holding the bare refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Key holding the serialized [`TokenPair`]
pub const TOKEN_PAIR_KEY: &str = "token_pair";

/// Durable key/value storage for session secrets
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `key`
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    async fn clear(&self, key: &str) -> Result<()>;
}

/// Load the current token pair
///
/// Falls back to the bare access/refresh keys when no serialized pair is
/// present (e.g. tokens written by an older client).
pub async fn load_token_pair(store: &dyn SessionStore) -> Result<Option<TokenPair>> {
    if let Some(json) = store.get(TOKEN_PAIR_KEY).await? {
        match serde_json::from_str::<TokenPair>(&json) {
            Ok(pair) => return Ok(Some(pair)),
            Err(e) => warn!(error = %e, "Failed to parse stored token pair"),
        }
    }

    let access_token = store.get(ACCESS_TOKEN_KEY).await?;
    let refresh_token = store.get(REFRESH_TOKEN_KEY).await?.filter(|t| !t.is_empty());
    if access_token.is_none() && refresh_token.is_none() {
        return Ok(None);
    }

    Ok(Some(TokenPair {
        access_token: access_token.unwrap_or_default(),
        refresh_token,
        token_type: "Bearer".to_string(),
        scope: None,
        expires_at: None,
        original_redirect_uri: None,
        original_client_metadata: None,
    }))
}

/// Persist `pair` under all session keys
pub async fn save_token_pair(store: &dyn SessionStore, pair: &TokenPair) -> Result<()> {
    let json = serde_json::to_string(pair)?;
    store.set(TOKEN_PAIR_KEY, &json).await?;
    store.set(ACCESS_TOKEN_KEY, &pair.access_token).await?;
    match pair.refresh_token() {
        Some(refresh_token) => store.set(REFRESH_TOKEN_KEY, refresh_token).await?,
        None => store.clear(REFRESH_TOKEN_KEY).await?,
    }
    debug!("Saved session tokens");
    Ok(())
}

/// Remove every session key
///
/// Attempts all keys even if one fails; returns the first failure.
pub async fn clear_tokens(store: &dyn SessionStore) -> Result<()> {
    let mut first_error = None;
    for key in [TOKEN_PAIR_KEY, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
        if let Err(e) = store.clear(key).await {
            warn!(key, error = %e, "Failed to clear session key");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// In-process session store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: DashMap<String, String>,
}

impl MemorySessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// File-backed session store: one owner-only file per key
#[derive(Debug)]
pub struct FileSessionStore {
    /// Base directory for session files
    base_dir: PathBuf,
    /// Separates sessions of different hosts/clients in one directory
    namespace: String,
}

impl FileSessionStore {
    /// Create a store rooted at `base_dir`, creating it if needed
    pub fn new(base_dir: PathBuf, namespace: impl Into<String>) -> Result<Self> {
        if !base_dir.exists() {
            std::fs::create_dir_all(&base_dir)
                .map_err(|e| Error::Storage(format!("Failed to create session dir: {e}")))?;
        }

        Ok(Self {
            base_dir,
            namespace: namespace.into(),
        })
    }

    /// Default location (`~/.oauth-session`)
    pub fn default_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Storage("Cannot determine home directory".to_string()))?;
        Ok(home.join(".oauth-session"))
    }

    fn storage_key(&self, key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update(b":");
        hasher.update(key.as_bytes());
        let hash = hasher.finalize();
        format!("{hash:x}")[..16].to_string()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}_{key}", self.storage_key(key)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to read {key}: {e}"))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let path = self.path_for(key);
        let write_err = |e: std::io::Error| Error::Storage(format!("Failed to write {key}: {e}"));

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // New files are owner-only from the first byte
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&path).await.map_err(write_err)?;

        // `mode` only applies on create; tighten files left by older writers
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| {
                    Error::Storage(format!("Failed to restrict permissions on {key}: {e}"))
                })?;
        }

        file.write_all(value.as_bytes()).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(key, "Deleted session entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to delete {key}: {e}"))),
        }
    }
}
