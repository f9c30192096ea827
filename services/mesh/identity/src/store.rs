//! Key persistence backends.
//!
//! The protocol core treats identity persistence as an opaque key-value
//! store: it owns no file format beyond "32 bytes in, 32 bytes out". The
//! in-memory backend serves tests; the file backend persists the seed as a
//! hex line under the daemon's data directory.

use async_trait::async_trait;
use rand_core::OsRng;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;
use zeroize::Zeroize;

use crate::error::IdentityError;
use crate::keys::{Identity, SEED_SIZE};

/// Opaque persistence for the identity master seed.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load the stored seed, if any.
    async fn load_seed(&self) -> Result<Option<[u8; SEED_SIZE]>, IdentityError>;

    /// Persist the seed, replacing any previous one.
    async fn save_seed(&self, seed: &[u8; SEED_SIZE]) -> Result<(), IdentityError>;
}

/// Volatile key store for development and testing.
#[derive(Default)]
pub struct MemoryKeyStore {
    seed: Mutex<Option<[u8; SEED_SIZE]>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load_seed(&self) -> Result<Option<[u8; SEED_SIZE]>, IdentityError> {
        Ok(*self.seed.lock().expect("key store lock"))
    }

    async fn save_seed(&self, seed: &[u8; SEED_SIZE]) -> Result<(), IdentityError> {
        *self.seed.lock().expect("key store lock") = Some(*seed);
        Ok(())
    }
}

/// File-backed key store: one hex-encoded seed per file.
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    /// Create a store at `path`. Parent directories are created on save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn load_seed(&self) -> Result<Option<[u8; SEED_SIZE]>, IdentityError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut decoded = hex::decode(content.trim()).map_err(|_| IdentityError::Corrupt)?;
        if decoded.len() != SEED_SIZE {
            decoded.zeroize();
            return Err(IdentityError::Corrupt);
        }

        let mut seed = [0u8; SEED_SIZE];
        seed.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Some(seed))
    }

    async fn save_seed(&self, seed: &[u8; SEED_SIZE]) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut encoded = hex::encode(seed);
        let result = std::fs::write(&self.path, format!("{encoded}\n"));
        encoded.zeroize();
        result?;
        Ok(())
    }
}

/// Load the identity from `store`, generating and persisting a fresh one on
/// first run.
pub async fn load_or_create_identity(store: &dyn KeyStore) -> Result<Identity, IdentityError> {
    if let Some(mut seed) = store.load_seed().await? {
        let identity = Identity::from_seed(&seed)?;
        seed.zeroize();
        info!("Loaded identity {}", identity.fingerprint());
        return Ok(identity);
    }

    let identity = Identity::generate(&mut OsRng);
    store.save_seed(identity.seed()).await?;
    info!("Generated new identity {}", identity.fingerprint());
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryKeyStore::new();
        assert!(store.load_seed().await.unwrap().is_none());

        let seed = [0x1Fu8; SEED_SIZE];
        store.save_seed(&seed).await.unwrap();
        assert_eq!(store.load_seed().await.unwrap(), Some(seed));
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("identity.key"));

        assert!(store.load_seed().await.unwrap().is_none());

        let seed = [0xABu8; SEED_SIZE];
        store.save_seed(&seed).await.unwrap();
        assert_eq!(store.load_seed().await.unwrap(), Some(seed));
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        std::fs::write(&path, "not hex at all\n").unwrap();

        let store = FileKeyStore::new(path);
        assert!(matches!(
            store.load_seed().await,
            Err(IdentityError::Corrupt)
        ));
    }

    #[tokio::test]
    async fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("identity.key"));

        let first = load_or_create_identity(&store).await.unwrap();
        let second = load_or_create_identity(&store).await.unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
    }
}
