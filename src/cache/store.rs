//! Cache generation storage
//!
//! A `CacheStorage` holds any number of named generations, each a map from
//! `RequestKey` to a stored `Response`. `DiskStorage` persists generations
//! under an XDG-compliant cache directory; `MemoryStorage` keeps them in a map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::{RequestKey, VersionTag};
use crate::error::CacheError;
use crate::fetch::{Response, ResponseType};

/// Storage for versioned cache generations
///
/// Individual `put`/`lookup` calls are atomic per key. Entries are replaced
/// wholesale, never edited in place.
#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
    /// Create the generation if it does not exist yet
    async fn open(&self, tag: &VersionTag) -> Result<(), CacheError>;

    /// All generations currently stored
    async fn keys(&self) -> Result<Vec<VersionTag>, CacheError>;

    /// Whether a generation exists
    async fn has(&self, tag: &VersionTag) -> Result<bool, CacheError> {
        Ok(self.keys().await?.contains(tag))
    }

    /// Look up a response by exact key within one generation
    async fn lookup(&self, tag: &VersionTag, key: &RequestKey)
        -> Result<Option<Response>, CacheError>;

    /// Store a response in an existing generation, replacing any previous
    /// entry for the key
    ///
    /// Fails if the generation does not exist, so a late write never
    /// resurrects a deleted generation.
    async fn put(
        &self,
        tag: &VersionTag,
        key: &RequestKey,
        response: &Response,
    ) -> Result<(), CacheError>;

    /// Store a batch of responses, creating the generation if needed
    ///
    /// On error the generation is left exactly as it was. Repeated keys keep
    /// the last response.
    async fn put_all(
        &self,
        tag: &VersionTag,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError>;

    /// Delete a generation, returning whether it existed
    async fn delete(&self, tag: &VersionTag) -> Result<bool, CacheError>;

    /// Keys stored in a generation (empty if the generation is absent)
    async fn entries(&self, tag: &VersionTag) -> Result<Vec<RequestKey>, CacheError>;
}

/// Metadata written next to each stored body
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    /// The request this entry answers
    key: RequestKey,
    status: u16,
    headers: Vec<(String, String)>,
    response_type: ResponseType,
    /// When the entry was stored
    stored_at: DateTime<Utc>,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores generations as directories of files on disk
///
/// Layout: `<root>/generations/<tag>/<sha256(key)>.json` holds the status,
/// headers and key; `<sha256(key)>.body` holds the raw body bytes. Files are
/// written under a temporary name and renamed into place. Batches are built
/// as a complete copy of the generation in a staging directory, which then
/// replaces the generation directory.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    /// Root directory (the registration state lives here too)
    root: PathBuf,
}

impl DiskStorage {
    /// Creates a DiskStorage in the XDG-compliant cache directory
    ///
    /// Uses `~/.cache/alcotrack/` on Linux, or the platform equivalent.
    /// Returns `None` if no home directory can be determined.
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "alcotrack")?;
        Some(Self::with_dir(project_dirs.cache_dir().to_path_buf()))
    }

    /// Creates a DiskStorage rooted at a custom directory
    pub fn with_dir(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generations_dir(&self) -> PathBuf {
        self.root.join("generations")
    }

    fn generation_dir(&self, tag: &VersionTag) -> Result<PathBuf, CacheError> {
        let name = tag.as_str();
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(CacheError::CacheStore(format!(
                "invalid version tag for disk storage: {:?}",
                name
            )));
        }
        Ok(self.generations_dir().join(name))
    }

    async fn staging_dir(&self, tag: &VersionTag) -> Result<PathBuf, CacheError> {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = self
            .generations_dir()
            .join(format!(".staging-{}-{}-{}", tag, std::process::id(), n));
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::store(format!("creating {}", dir.display()), e))?;
        Ok(dir)
    }

    /// Fill `staging` with the full new generation: the entries `target`
    /// already holds, overlaid with `entries` (later duplicates win)
    async fn stage_generation(
        staging: &Path,
        target: &Path,
        entries: &[(RequestKey, Response)],
    ) -> Result<(), CacheError> {
        copy_entry_files(target, staging).await?;
        for (key, response) in entries {
            Self::write_entry(staging, key, response).await?;
        }
        Ok(())
    }

    /// Replace `target` with `staging` in two renames, restoring the old
    /// directory if the second rename fails
    async fn swap_in(
        &self,
        tag: &VersionTag,
        staging: &Path,
        target: &Path,
    ) -> Result<(), CacheError> {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let backup = self
            .generations_dir()
            .join(format!(".old-{}-{}-{}", tag, std::process::id(), n));

        let had_target = match fs::rename(target, &backup).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                return Err(CacheError::store(
                    format!("moving aside {}", target.display()),
                    e,
                ))
            }
        };

        if let Err(e) = fs::rename(staging, target).await {
            if had_target {
                if let Err(restore) = fs::rename(&backup, target).await {
                    warn!(
                        dir = %backup.display(),
                        error = %restore,
                        "could not restore previous generation"
                    );
                }
            }
            return Err(CacheError::store(format!("committing {}", target.display()), e));
        }

        if had_target {
            if let Err(e) = fs::remove_dir_all(&backup).await {
                debug!(dir = %backup.display(), error = %e, "failed to remove previous generation");
            }
        }
        Ok(())
    }

    async fn write_entry(dir: &Path, key: &RequestKey, response: &Response) -> Result<(), CacheError> {
        let stem = entry_stem(key);
        let meta = EntryMeta {
            key: key.clone(),
            status: response.status,
            headers: response.headers.clone(),
            response_type: response.response_type,
            stored_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| CacheError::store("encoding entry metadata", e))?;

        // Body first so a visible metadata file always has its body.
        write_atomic(&dir.join(format!("{}.body", stem)), &response.body).await?;
        write_atomic(&dir.join(format!("{}.json", stem)), &json).await
    }
}

/// File stem for a key: hex SHA-256 of `METHOD url`
fn entry_stem(key: &RequestKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.method.as_bytes());
    hasher.update(b" ");
    hasher.update(key.url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Copy committed entry files (not temp files) from `from` into `to`
async fn copy_entry_files(from: &Path, to: &Path) -> Result<(), CacheError> {
    let mut read_dir = match fs::read_dir(from).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CacheError::store(format!("listing {}", from.display()), e)),
    };

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| CacheError::store(format!("listing {}", from.display()), e))?
    {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        fs::copy(entry.path(), to.join(&name))
            .await
            .map_err(|e| CacheError::store(format!("copying {}", entry.path().display()), e))?;
    }
    Ok(())
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, n));
    fs::write(&tmp, contents)
        .await
        .map_err(|e| CacheError::store(format!("writing {}", tmp.display()), e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| CacheError::store(format!("renaming into {}", path.display()), e))
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, tag: &VersionTag) -> Result<(), CacheError> {
        let dir = self.generation_dir(tag)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::store(format!("creating {}", dir.display()), e))
    }

    async fn keys(&self) -> Result<Vec<VersionTag>, CacheError> {
        let dir = self.generations_dir();
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::store(format!("listing {}", dir.display()), e)),
        };

        let mut tags = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CacheError::store(format!("listing {}", dir.display()), e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                tags.push(VersionTag::new(name));
            }
        }
        tags.sort();
        Ok(tags)
    }

    async fn has(&self, tag: &VersionTag) -> Result<bool, CacheError> {
        let dir = self.generation_dir(tag)?;
        fs::try_exists(&dir)
            .await
            .map_err(|e| CacheError::store(format!("checking {}", dir.display()), e))
    }

    async fn lookup(
        &self,
        tag: &VersionTag,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError> {
        let dir = self.generation_dir(tag)?;
        let stem = entry_stem(key);

        let meta_bytes = match fs::read(dir.join(format!("{}.json", stem))).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::store("reading entry metadata", e)),
        };
        let meta: EntryMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| CacheError::store("decoding entry metadata", e))?;
        if &meta.key != key {
            return Ok(None);
        }

        let body = fs::read(dir.join(format!("{}.body", stem)))
            .await
            .map_err(|e| CacheError::store("reading entry body", e))?;

        Ok(Some(Response {
            status: meta.status,
            headers: meta.headers,
            body,
            response_type: meta.response_type,
        }))
    }

    async fn put(
        &self,
        tag: &VersionTag,
        key: &RequestKey,
        response: &Response,
    ) -> Result<(), CacheError> {
        let dir = self.generation_dir(tag)?;
        if !self.has(tag).await? {
            return Err(CacheError::CacheStore(format!(
                "generation {} does not exist",
                tag
            )));
        }
        Self::write_entry(&dir, key, response).await
    }

    async fn put_all(
        &self,
        tag: &VersionTag,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        let target = self.generation_dir(tag)?;
        let staging = self.staging_dir(tag).await?;

        let result = match Self::stage_generation(&staging, &target, &entries).await {
            Ok(()) => self.swap_in(tag, &staging, &target).await,
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(e) = fs::remove_dir_all(&staging).await {
                debug!(dir = %staging.display(), error = %e, "failed to remove staging directory");
            }
        }
        result
    }

    async fn delete(&self, tag: &VersionTag) -> Result<bool, CacheError> {
        let dir = self.generation_dir(tag)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::store(format!("deleting {}", dir.display()), e)),
        }
    }

    async fn entries(&self, tag: &VersionTag) -> Result<Vec<RequestKey>, CacheError> {
        let dir = self.generation_dir(tag)?;
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::store(format!("listing {}", dir.display()), e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CacheError::store(format!("listing {}", dir.display()), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)
                .await
                .map_err(|e| CacheError::store(format!("reading {}", path.display()), e))?;
            if let Ok(meta) = serde_json::from_slice::<EntryMeta>(&bytes) {
                keys.push(meta.key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory generations, for tests and embedders that need no persistence
#[derive(Debug, Default)]
pub struct MemoryStorage {
    generations: RwLock<HashMap<VersionTag, HashMap<RequestKey, Response>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, tag: &VersionTag) -> Result<(), CacheError> {
        self.generations
            .write()
            .await
            .entry(tag.clone())
            .or_default();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<VersionTag>, CacheError> {
        let mut tags: Vec<VersionTag> = self.generations.read().await.keys().cloned().collect();
        tags.sort();
        Ok(tags)
    }

    async fn lookup(
        &self,
        tag: &VersionTag,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError> {
        Ok(self
            .generations
            .read()
            .await
            .get(tag)
            .and_then(|generation| generation.get(key))
            .cloned())
    }

    async fn put(
        &self,
        tag: &VersionTag,
        key: &RequestKey,
        response: &Response,
    ) -> Result<(), CacheError> {
        match self.generations.write().await.get_mut(tag) {
            Some(generation) => {
                generation.insert(key.clone(), response.clone());
                Ok(())
            }
            None => Err(CacheError::CacheStore(format!(
                "generation {} does not exist",
                tag
            ))),
        }
    }

    async fn put_all(
        &self,
        tag: &VersionTag,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        let mut generations = self.generations.write().await;
        generations.entry(tag.clone()).or_default().extend(entries);
        Ok(())
    }

    async fn delete(&self, tag: &VersionTag) -> Result<bool, CacheError> {
        Ok(self.generations.write().await.remove(tag).is_some())
    }

    async fn entries(&self, tag: &VersionTag) -> Result<Vec<RequestKey>, CacheError> {
        let mut keys: Vec<RequestKey> = self
            .generations
            .read()
            .await
            .get(tag)
            .map(|generation| generation.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}
