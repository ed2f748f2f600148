//! Versioned response cache
//!
//! Entries live in named generations. With a root directory every generation
//! is a directory and every entry a JSON file named by the BLAKE3 hash of its
//! request key; without one the cache only lives in memory. A new
//! generation is written to a hidden staging directory and renamed into
//! place, so a failed write never leaves a half-filled generation behind.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::fetcher::{AssetRequest, AssetResponse, RequestKey};
use super::ShellError;

type Generation = HashMap<RequestKey, AssetResponse>;

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: RequestKey,
    response: AssetResponse,
}

pub struct CacheStorage {
    root: Option<PathBuf>,
    generations: RwLock<BTreeMap<String, Generation>>,
    tmp_counter: AtomicU64,
}

impl CacheStorage {
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            root: None,
            generations: RwLock::new(BTreeMap::new()),
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Open a directory-backed storage, loading whatever generations it
    /// already holds. Unreadable entries are skipped.
    pub async fn open_dir(root: impl Into<PathBuf>) -> Result<Arc<Self>, ShellError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let mut generations = BTreeMap::new();
        let mut dirs = fs::read_dir(&root).await?;
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(tag) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if tag.starts_with('.') {
                // staging left over from an interrupted write
                debug!(%tag, "removing stale staging directory");
                fs::remove_dir_all(entry.path()).await?;
                continue;
            }
            let generation = load_generation(&entry.path()).await?;
            debug!(%tag, entries = generation.len(), "loaded cache generation");
            generations.insert(tag, generation);
        }

        Ok(Arc::new(Self {
            root: Some(root),
            generations: RwLock::new(generations),
            tmp_counter: AtomicU64::new(0),
        }))
    }

    /// Handle to the generation `tag`, creating it if needed.
    pub async fn open(self: &Arc<Self>, tag: &str) -> Result<Cache, ShellError> {
        validate_tag(tag)?;
        let mut generations = self.generations.write().await;
        if !generations.contains_key(tag) {
            if let Some(dir) = self.generation_dir(tag) {
                fs::create_dir_all(&dir).await?;
            }
            generations.insert(tag.to_string(), Generation::new());
        }
        Ok(Cache {
            tag: tag.to_string(),
            storage: self.clone(),
        })
    }

    /// Store `entries` under `tag` as one unit: either all of them are
    /// stored or none is. A generation that did not exist yet is only
    /// created once every entry has been written.
    pub async fn populate(
        self: &Arc<Self>,
        tag: &str,
        entries: Vec<(AssetRequest, AssetResponse)>,
    ) -> Result<Cache, ShellError> {
        validate_tag(tag)?;
        let entries = cacheable(entries)?;
        let mut generations = self.generations.write().await;

        match generations.get_mut(tag) {
            Some(generation) => self.write_into(tag, generation, entries).await?,
            None => {
                if let Some(root) = &self.root {
                    self.commit_new_generation(root, tag, &entries).await?;
                }
                generations.insert(tag.to_string(), entries.into_iter().collect());
            }
        }
        Ok(self.handle(tag))
    }

    /// Handle to `tag` without creating it. Writes through the handle are
    /// dropped while the generation does not exist.
    pub fn handle(self: &Arc<Self>, tag: &str) -> Cache {
        Cache {
            tag: tag.to_string(),
            storage: self.clone(),
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        self.generations.read().await.keys().cloned().collect()
    }

    pub async fn has(&self, tag: &str) -> bool {
        self.generations.read().await.contains_key(tag)
    }

    /// Drop a whole generation. Returns whether it existed.
    pub async fn delete(&self, tag: &str) -> Result<bool, ShellError> {
        validate_tag(tag)?;
        let mut generations = self.generations.write().await;
        let existed = generations.remove(tag).is_some();
        if let Some(dir) = self.generation_dir(tag) {
            if fs::try_exists(&dir).await? {
                fs::remove_dir_all(&dir).await?;
            }
        }
        Ok(existed)
    }

    /// Look a request up in one generation without creating it.
    pub async fn lookup(&self, tag: &str, request: &AssetRequest) -> Option<AssetResponse> {
        let generations = self.generations.read().await;
        generations.get(tag)?.get(&request.key()).cloned()
    }

    fn generation_dir(&self, tag: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(tag))
    }

    async fn write_entries(
        &self,
        tag: &str,
        entries: Vec<(RequestKey, AssetResponse)>,
    ) -> Result<(), ShellError> {
        let mut generations = self.generations.write().await;
        let Some(generation) = generations.get_mut(tag) else {
            // deleted by an activation while the write was pending
            debug!(%tag, "skipping write to a removed cache generation");
            return Ok(());
        };
        self.write_into(tag, generation, entries).await
    }

    /// Write a batch into an existing generation. On failure the files
    /// already written are put back to what `generation` holds.
    async fn write_into(
        &self,
        tag: &str,
        generation: &mut Generation,
        entries: Vec<(RequestKey, AssetResponse)>,
    ) -> Result<(), ShellError> {
        if let Some(dir) = self.generation_dir(tag) {
            for (done, (key, response)) in entries.iter().enumerate() {
                if let Err(e) = self.write_entry_file(&dir, key, response).await {
                    self.roll_back(&dir, generation, &entries[..done]).await;
                    return Err(e);
                }
            }
        }
        generation.extend(entries);
        Ok(())
    }

    async fn roll_back(
        &self,
        dir: &Path,
        generation: &Generation,
        written: &[(RequestKey, AssetResponse)],
    ) {
        for (key, _) in written {
            let restored = match generation.get(key) {
                Some(previous) => self.write_entry_file(dir, key, previous).await,
                None => fs::remove_file(dir.join(entry_file_name(key)))
                    .await
                    .map_err(ShellError::from),
            };
            if let Err(e) = restored {
                warn!(url = %key.url, error = %e, "could not roll back cache entry");
            }
        }
    }

    async fn commit_new_generation(
        &self,
        root: &Path,
        tag: &str,
        entries: &[(RequestKey, AssetResponse)],
    ) -> Result<(), ShellError> {
        let staging = root.join(format!(
            ".staging-{}-{}",
            tag,
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        let result = self.stage_and_swap(&staging, &root.join(tag), entries).await;
        if result.is_err() && fs::try_exists(&staging).await.unwrap_or(false) {
            if let Err(e) = fs::remove_dir_all(&staging).await {
                warn!(path = %staging.display(), error = %e, "could not remove staging directory");
            }
        }
        result
    }

    async fn stage_and_swap(
        &self,
        staging: &Path,
        dir: &Path,
        entries: &[(RequestKey, AssetResponse)],
    ) -> Result<(), ShellError> {
        fs::create_dir_all(staging).await?;
        for (key, response) in entries {
            self.write_entry_file(staging, key, response).await?;
        }
        // a directory without a live generation is debris
        if fs::try_exists(dir).await? {
            fs::remove_dir_all(dir).await?;
        }
        fs::rename(staging, dir).await?;
        Ok(())
    }

    async fn write_entry_file(
        &self,
        dir: &Path,
        key: &RequestKey,
        response: &AssetResponse,
    ) -> Result<(), ShellError> {
        let stored = StoredEntry {
            key: key.clone(),
            response: response.clone(),
        };
        let json = serde_json::to_vec(&stored)?;
        let path = dir.join(entry_file_name(key));
        let tmp = dir.join(format!(
            ".{}.tmp",
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, json).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// A single generation of the storage
#[derive(Clone)]
pub struct Cache {
    tag: String,
    storage: Arc<CacheStorage>,
}

impl Cache {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub async fn match_request(&self, request: &AssetRequest) -> Option<AssetResponse> {
        self.storage.lookup(&self.tag, request).await
    }

    /// Store a response. Last write for a key wins.
    pub async fn put(&self, request: &AssetRequest, response: AssetResponse) -> Result<(), ShellError> {
        self.put_all(vec![(request.clone(), response)]).await
    }

    /// Store several responses in one write. Nothing is stored if any of the
    /// requests is not a GET or any write fails.
    pub async fn put_all(&self, entries: Vec<(AssetRequest, AssetResponse)>) -> Result<(), ShellError> {
        let entries = cacheable(entries)?;
        self.storage.write_entries(&self.tag, entries).await
    }

    pub async fn keys(&self) -> Vec<RequestKey> {
        let generations = self.storage.generations.read().await;
        generations
            .get(&self.tag)
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        let generations = self.storage.generations.read().await;
        generations.get(&self.tag).map(|g| g.len()).unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn validate_tag(tag: &str) -> Result<(), ShellError> {
    let valid = !tag.is_empty()
        && tag != "."
        && tag != ".."
        && !tag.starts_with('.')
        && !tag.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(ShellError::InvalidTag(tag.to_string()))
    }
}

fn cacheable(
    entries: Vec<(AssetRequest, AssetResponse)>,
) -> Result<Vec<(RequestKey, AssetResponse)>, ShellError> {
    if let Some((request, _)) = entries.iter().find(|(r, _)| !r.is_get()) {
        return Err(ShellError::NotCacheable(request.method.to_string()));
    }
    Ok(entries
        .into_iter()
        .map(|(request, response)| (request.key(), response))
        .collect())
}

fn entry_file_name(key: &RequestKey) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key.method.as_bytes());
    hasher.update(b" ");
    hasher.update(key.url.as_bytes());
    format!("{}.json", hasher.finalize().to_hex())
}

async fn load_generation(dir: &Path) -> Result<Generation, ShellError> {
    let mut generation = Generation::new();
    let mut files = fs::read_dir(dir).await?;
    while let Some(file) = files.next_entry().await? {
        let path = file.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = fs::read(&path).await?;
        match serde_json::from_slice::<StoredEntry>(&raw) {
            Ok(entry) => {
                generation.insert(entry.key, entry.response);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable cache entry"),
        }
    }
    Ok(generation)
}
