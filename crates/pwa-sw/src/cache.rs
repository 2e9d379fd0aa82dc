//! Named response stores.
//!
//! ```text
//! CacheStorage
//!     └── Cache ("<role>-<tag>")
//!             └── RequestKey (method + URL) → StoredResponse
//! ```
//!
//! Stores are shared as `Arc<Cache>`; a reader that obtained a handle before the
//! store was deleted keeps reading from it, it just no longer appears in
//! [`CacheStorage::keys`].

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use pwa_common::{PwaError, Result, ResultExt};
use pwa_net::{Parts, Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use url::Url;

const SNAPSHOT_FORMAT: u32 = 1;

/// Cache key: method plus absolute URL, fragment ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn from_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }
}

/// Immutable snapshot of a response taken at store time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub url: Option<String>,
    pub status: u16,
    /// Header values kept as raw bytes; they need not be UTF-8.
    pub headers: Vec<(String, Bytes)>,
    pub body: Bytes,
    /// Milliseconds since the Unix epoch.
    pub cached_at: u64,
}

impl StoredResponse {
    /// Capture a response. Takes ownership, so pass a [`Response::duplicate`]
    /// when the original still has to reach the caller.
    pub fn snapshot(response: Response) -> Self {
        let (parts, body) = response.into_parts();
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Bytes::copy_from_slice(value.as_bytes()),
                )
            })
            .collect();

        Self {
            url: parts.url.map(String::from),
            status: parts.status.as_u16(),
            headers,
            body,
            cached_at: now_millis(),
        }
    }

    /// Rebuild a fresh response; the stored snapshot stays untouched.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => trace!(header = %name, "Dropping unrepresentable stored header"),
            }
        }

        Response::from_parts(
            Parts {
                url: self.url.as_deref().and_then(|u| Url::parse(u).ok()),
                // Statuses are validated when written and when a snapshot is loaded.
                status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
                headers,
                redirected: false,
            },
            self.body.clone(),
        )
    }
}

/// A single named store.
#[derive(Debug)]
pub struct Cache {
    name: String,
    entries: RwLock<HashMap<RequestKey, StoredResponse>>,
}

impl Cache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a key.
    pub async fn match_request(&self, key: &RequestKey) -> Option<StoredResponse> {
        self.entries.read().await.get(key).cloned()
    }

    /// Store a response for a request, overwriting any existing entry.
    pub async fn put(&self, request: &Request, response: Response) -> Result<()> {
        check_cacheable(request, &response)?;
        self.put_entry(RequestKey::from_request(request), StoredResponse::snapshot(response))
            .await;
        Ok(())
    }

    /// Store a prepared snapshot under `key`.
    pub async fn put_entry(&self, key: RequestKey, entry: StoredResponse) {
        trace!(cache = %self.name, url = %key.url, status = entry.status, "Cache put");
        self.entries.write().await.insert(key, entry);
    }

    /// Store several responses under one write lock; either all are checked
    /// and inserted or none are.
    pub async fn put_all(&self, pairs: Vec<(Request, Response)>) -> Result<()> {
        for (request, response) in &pairs {
            check_cacheable(request, response)?;
        }
        let prepared: Vec<_> = pairs
            .into_iter()
            .map(|(request, response)| {
                (
                    RequestKey::from_request(&request),
                    StoredResponse::snapshot(response),
                )
            })
            .collect();

        let mut entries = self.entries.write().await;
        for (key, entry) in prepared {
            entries.insert(key, entry);
        }
        Ok(())
    }

    /// All keys, sorted by URL.
    pub async fn keys(&self) -> Vec<RequestKey> {
        let mut keys: Vec<_> = self.entries.read().await.keys().cloned().collect();
        keys.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.method.cmp(&b.method)));
        keys
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn check_cacheable(request: &Request, response: &Response) -> Result<()> {
    if request.method != Method::GET {
        return Err(PwaError::cache(format!(
            "only GET requests can be cached, got {} {}",
            request.method, request.url
        )));
    }
    if response.status() == StatusCode::PARTIAL_CONTENT {
        return Err(PwaError::cache(format!(
            "partial response for {} cannot be cached",
            request.url
        )));
    }
    Ok(())
}

/// All named stores.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: RwLock<HashMap<String, Arc<Cache>>>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    format: u32,
    caches: HashMap<String, Vec<SnapshotEntry>>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    key: RequestKey,
    response: StoredResponse,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store, creating it if it doesn't exist.
    pub async fn open(&self, name: &str) -> Arc<Cache> {
        if let Some(cache) = self.caches.read().await.get(name) {
            return Arc::clone(cache);
        }
        let mut caches = self.caches.write().await;
        let cache = caches.entry(name.to_string()).or_insert_with(|| {
            debug!(cache = %name, "Creating cache store");
            Arc::new(Cache::new(name))
        });
        Arc::clone(cache)
    }

    /// Get an existing store without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<Cache>> {
        self.caches.read().await.get(name).cloned()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    /// Delete a whole store. Returns false if it did not exist.
    pub async fn delete(&self, name: &str) -> bool {
        self.caches.write().await.remove(name).is_some()
    }

    /// All store names, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut names: Vec<_> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look `key` up in the named stores, in order. Returns the store that
    /// answered along with the entry.
    pub async fn match_in(
        &self,
        names: &[String],
        key: &RequestKey,
    ) -> Option<(Arc<Cache>, StoredResponse)> {
        let handles: Vec<Arc<Cache>> = {
            let caches = self.caches.read().await;
            names.iter().filter_map(|n| caches.get(n).cloned()).collect()
        };

        for cache in handles {
            if let Some(entry) = cache.match_request(key).await {
                return Some((cache, entry));
            }
        }
        None
    }

    /// Write every store to a JSON snapshot file.
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let handles: Vec<Arc<Cache>> = self.caches.read().await.values().cloned().collect();

        let mut caches = HashMap::with_capacity(handles.len());
        for cache in handles {
            let entries = cache
                .entries
                .read()
                .await
                .iter()
                .map(|(key, response)| SnapshotEntry {
                    key: key.clone(),
                    response: response.clone(),
                })
                .collect();
            caches.insert(cache.name.clone(), entries);
        }

        let snapshot = Snapshot {
            format: SNAPSHOT_FORMAT,
            caches,
        };
        let path = path.as_ref();
        let json = serde_json::to_vec(&snapshot)?;
        tokio::fs::write(path, json).await?;
        debug!(path = %path.display(), "Cache snapshot saved");
        Ok(())
    }

    /// Load stores from a JSON snapshot file.
    pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path)
            .await
            .context(format!("reading cache snapshot {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_slice(&raw)?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(PwaError::cache(format!(
                "unsupported snapshot format {}",
                snapshot.format
            )));
        }

        let mut caches = HashMap::with_capacity(snapshot.caches.len());
        for (name, entries) in snapshot.caches {
            let mut map = HashMap::with_capacity(entries.len());
            for SnapshotEntry { key, response } in entries {
                if StatusCode::from_u16(response.status).is_err() {
                    warn!(cache = %name, url = %key.url, status = response.status, "Skipping entry with invalid status");
                    continue;
                }
                map.insert(key, response);
            }
            let cache = Cache {
                name: name.clone(),
                entries: RwLock::new(map),
            };
            caches.insert(name, Arc::new(cache));
        }

        debug!(path = %path.display(), stores = caches.len(), "Cache snapshot loaded");
        Ok(Self {
            caches: RwLock::new(caches),
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
