//! Offline asset shell
//!
//! Keeps the static shell loadable without network. One generation of the
//! cache is live at a time:
//!
//! - `install` fetches the whole manifest fresh and stores it under the
//!   current generation tag, or stores nothing at all.
//! - `activate` deletes every other generation.
//! - `respond` serves GETs stale-while-revalidate; everything else goes
//!   straight to the network.

pub mod cache;
pub mod fetcher;

use futures_util::future::try_join_all;
use reqwest::Url;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use cache::{Cache, CacheStorage};
pub use fetcher::{AssetRequest, AssetResponse, FetchError, Fetcher, HttpFetcher, RequestKey};

pub const DEFAULT_GENERATION: &str = "jarvis-v1";
pub const DEFAULT_MANIFEST: [&str; 5] = [
    "/",
    "/index.html",
    "/styles.css",
    "/app.js",
    "/manifest.webmanifest",
];

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("install failed on {url}: {reason}")]
    Install { url: String, reason: String },
    #[error(transparent)]
    Network(#[from] FetchError),
    #[error("invalid cache generation tag {0:?}")]
    InvalidTag(String),
    #[error("invalid asset path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("only GET responses can be cached, got {0}")]
    NotCacheable(String),
    #[error("cache storage I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Cache,
    Network,
    /// Non-GET request, never looked up or stored
    Passthrough,
}

pub type Revalidation = JoinHandle<Result<AssetResponse, FetchError>>;

/// Response handed back to the page
#[derive(Debug)]
pub struct Served {
    pub response: AssetResponse,
    pub source: ServedFrom,
    /// Background refresh started for a cache hit. Dropping it does not
    /// cancel the refresh.
    pub revalidation: Option<Revalidation>,
}

pub struct OfflineShell {
    generation: String,
    origin: Url,
    manifest: Vec<String>,
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl OfflineShell {
    pub fn new(
        generation: impl Into<String>,
        origin: Url,
        manifest: Vec<String>,
        storage: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            generation: generation.into(),
            origin,
            manifest,
            storage,
            fetcher,
        }
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn manifest(&self) -> &[String] {
        &self.manifest
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    /// Absolute URL for a manifest path
    pub fn resolve(&self, path: &str) -> Result<Url, ShellError> {
        self.origin.join(path).map_err(|e| ShellError::InvalidPath {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Fetch every manifest asset and store them under the current
    /// generation. Any failed or non-2xx fetch fails the install and leaves
    /// the generation untouched.
    pub async fn install(&self) -> Result<usize, ShellError> {
        let requests = self
            .manifest
            .iter()
            .map(|path| self.resolve(path).map(AssetRequest::get))
            .collect::<Result<Vec<_>, _>>()?;

        info!(generation = %self.generation, assets = requests.len(), "installing shell");

        let fetches = requests.into_iter().map(|request| {
            let fetcher = self.fetcher.clone();
            async move {
                let response = fetcher
                    .fetch(&request)
                    .await
                    .map_err(|e| ShellError::Install {
                        url: request.url.to_string(),
                        reason: e.to_string(),
                    })?;
                if !response.is_success() {
                    return Err(ShellError::Install {
                        url: request.url.to_string(),
                        reason: format!("status {}", response.status),
                    });
                }
                Ok((request, response))
            }
        });
        let entries = try_join_all(fetches).await?;
        let count = entries.len();

        self.storage.populate(&self.generation, entries).await?;

        info!(generation = %self.generation, assets = count, "shell installed");
        Ok(count)
    }

    /// Delete every generation except the current one. Returns the deleted
    /// tags.
    pub async fn activate(&self) -> Result<Vec<String>, ShellError> {
        let mut deleted = Vec::new();
        for tag in self.storage.keys().await {
            if tag == self.generation {
                continue;
            }
            if self.storage.delete(&tag).await? {
                info!(%tag, "deleted stale cache generation");
                deleted.push(tag);
            }
        }
        Ok(deleted)
    }

    /// Answer a request. GETs are served stale-while-revalidate from the
    /// current generation; other methods pass through untouched.
    pub async fn respond(&self, request: AssetRequest) -> Result<Served, ShellError> {
        if !request.is_get() {
            let response = self.fetcher.fetch(&request).await?;
            return Ok(Served {
                response,
                source: ServedFrom::Passthrough,
                revalidation: None,
            });
        }

        let cached = self.storage.lookup(&self.generation, &request).await;
        let network = self.spawn_network_fetch(request.clone(), cached.is_some());

        match cached {
            Some(response) => {
                debug!(url = %request.url, "serving from cache");
                Ok(Served {
                    response,
                    source: ServedFrom::Cache,
                    revalidation: Some(network),
                })
            }
            None => {
                let response = network.await.map_err(|_| FetchError::Aborted {
                    url: request.url.to_string(),
                })??;
                Ok(Served {
                    response,
                    source: ServedFrom::Network,
                    revalidation: None,
                })
            }
        }
    }

    /// Fetch from the network and store successful responses. `background`
    /// marks a refresh nobody is waiting on; its failures are only logged.
    fn spawn_network_fetch(&self, request: AssetRequest, background: bool) -> Revalidation {
        let fetcher = self.fetcher.clone();
        let storage = self.storage.clone();
        let generation = self.generation.clone();

        tokio::spawn(async move {
            let response = match fetcher.fetch(&request).await {
                Ok(response) => response,
                Err(e) => {
                    if background {
                        warn!(url = %request.url, error = %e, "background refresh failed, keeping cached copy");
                    }
                    return Err(e);
                }
            };

            if !response.is_success() {
                debug!(url = %request.url, status = response.status, "not caching unsuccessful response");
                return Ok(response);
            }

            let cache = storage.handle(&generation);
            if let Err(e) = cache.put(&request, response.clone()).await {
                warn!(url = %request.url, error = %e, "failed to update cache entry");
            }
            Ok(response)
        })
    }
}
