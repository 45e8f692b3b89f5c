use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{CacheError, CacheResult};
use crate::policy::CachePolicyItem;
use crate::types::{CacheEntry, CacheKey, CacheValue};

use super::{CacheProvider, DurableCacheProvider};

/// Configuration for the file-backed provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsCacheConfig {
    /// Directory the cache lives under. Will be created if it does not exist.
    pub root: PathBuf,
}

/// A durable-tier provider persisting entries to the file system.
///
/// Each entry is one opaque data blob plus a sibling `.policy` file holding the
/// serialized policy line. Keys are hashed, so any key is storable and file names stay
/// fixed-width. Only [`Bytes`] payloads can be stored in this tier; serializing richer
/// values is a concern of the caller.
///
/// All entries of one cache live inside a *generation* directory under the root.
/// [`clear`](CacheProvider::clear) is an O(1) swap to a fresh generation; the old one
/// is deleted in the background.
pub struct FsCacheProvider {
    root: PathBuf,
    /// The current generation directory. Swapped out wholesale by `clear`.
    generation: RwLock<PathBuf>,
}

/// The sibling file a blob's serialized policy line lives in.
fn metadata_path(path: &Path) -> PathBuf {
    let mut path = path.as_os_str().to_os_string();
    path.push(".policy");
    path.into()
}

fn generation_name() -> String {
    let name: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    name
}

impl FsCacheProvider {
    pub fn new(config: FsCacheConfig) -> io::Result<Self> {
        let root = config.root;
        let generation = root.join(generation_name());
        std::fs::create_dir_all(&generation)?;
        Ok(Self {
            root,
            generation: RwLock::new(generation),
        })
    }

    /// Returns the blob path for `key` inside the current generation.
    ///
    /// The relative path is the sha-256 of the key, hex-formatted like so:
    /// `aa/bbccdd...`, to keep directory fan-out bounded.
    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let hash = Sha256::digest(key.as_str().as_bytes());
        let mut name = String::with_capacity(62);
        for b in &hash[1..] {
            write!(name, "{b:02x}").unwrap();
        }
        let generation = self.generation.read().unwrap();
        generation.join(format!("{:02x}", hash[0])).join(name)
    }

    async fn read_entry(&self, key: &CacheKey) -> CacheResult<Option<(CacheValue, CachePolicyItem)>> {
        let path = self.entry_path(key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let line = match tokio::fs::read_to_string(metadata_path(&path)).await {
            Ok(line) => line,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // A blob without its policy sideline is unusable.
                remove_entry_files(&path).await;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let Ok(policy) = line.trim_end().parse::<CachePolicyItem>() else {
            tracing::error!(%key, path = %path.display(), "Unparsable cache policy line");
            remove_entry_files(&path).await;
            return Ok(None);
        };

        if !policy.is_valid() {
            tracing::trace!(%key, "Dropping expired file cache entry");
            remove_entry_files(&path).await;
            return Ok(None);
        }

        Ok(Some((CacheValue::new(Bytes::from(data)), policy)))
    }
}

impl std::fmt::Debug for FsCacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsCacheProvider")
            .field("root", &self.root)
            .finish()
    }
}

/// Removes a blob and its policy sideline, ignoring files that are already gone.
async fn remove_entry_files(path: &Path) {
    for path in [path.to_path_buf(), metadata_path(path)] {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %path.display(),
                    "Failed to remove cache file",
                );
            }
        }
    }
}

#[async_trait]
impl CacheProvider for FsCacheProvider {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheValue>> {
        Ok(self.read_entry(key).await?.map(|(value, _)| value))
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: CacheValue,
        policy: CachePolicyItem,
    ) -> CacheResult<()> {
        let Some(blob) = value.downcast::<Bytes>() else {
            return Err(CacheError::Provider(
                "the file cache stores raw byte payloads only".into(),
            ));
        };

        let path = self.entry_path(key);
        let parent = path
            .parent()
            .ok_or_else(|| CacheError::Provider("cache path has no parent directory".into()))?;
        std::fs::create_dir_all(parent)?;

        // Write through a temp file in the same directory so the final rename is atomic
        // and a concurrent reader never observes a half-written blob.
        let mut temp_file = NamedTempFile::new_in(parent)?;
        temp_file.write_all(&blob)?;
        temp_file.persist(&path).map_err(|e| CacheError::from(e.error))?;

        std::fs::write(metadata_path(&path), policy.to_string())?;

        tracing::trace!(%key, path = %path.display(), "Persisted cache entry");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        remove_entry_files(&self.entry_path(key)).await;
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        let fresh = self.root.join(generation_name());
        std::fs::create_dir_all(&fresh)?;

        let old = {
            let mut generation = self.generation.write().unwrap();
            std::mem::replace(&mut *generation, fresh)
        };

        // Future reads and writes already target the fresh generation; the old tree
        // only needs to disappear eventually.
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::remove_dir_all(&old).await {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::error!(
                        error = &e as &dyn std::error::Error,
                        path = %old.display(),
                        "Failed to remove old cache generation",
                    );
                }
            }
        });

        Ok(())
    }
}

#[async_trait]
impl DurableCacheProvider for FsCacheProvider {
    async fn get_entry(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        Ok(self.read_entry(key).await?.map(|(value, policy)| CacheEntry {
            key: key.clone(),
            value,
            policy,
        }))
    }
}
