//! Versioned cache lifecycle: install (precache) and activate (evict + claim).
//!
//! ```text
//! Registration
//!     ├── installing   (precaching, not yet valid)
//!     ├── waiting      (installed, precache complete)
//!     └── active       (serving requests; its tag is "current")
//! ```
//!
//! An install that fails leaves `active` untouched, so the previous version
//! keeps serving. Activation skips waiting: the installed worker is promoted
//! immediately and claims every open client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use pwa_common::{PwaError, Result, SwConfig, VersionConfig};
use pwa_net::{Fetcher, Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::Clients;

/// Unique identifier for a worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    #[default]
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// One generation of the worker, bound to a cache version.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    pub version: VersionConfig,
    pub state: ServiceWorkerState,
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    fn new(version: VersionConfig) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            version,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    fn set_state(&mut self, state: ServiceWorkerState) {
        debug!(worker = self.id.raw(), tag = %self.version.tag, ?state, "Worker state change");
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Whether this worker may answer fetches.
    pub fn is_serving(&self) -> bool {
        matches!(
            self.state,
            ServiceWorkerState::Activating | ServiceWorkerState::Activated
        )
    }
}

#[derive(Debug)]
struct Registration {
    installing: Option<ServiceWorker>,
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
}

/// Ordered list of URLs fetched into the app-shell store at install time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheManifest {
    urls: Vec<Url>,
}

impl PrecacheManifest {
    pub fn new(urls: Vec<Url>) -> Self {
        Self { urls }
    }

    /// Manifest from configuration, relative entries resolved against the origin.
    pub fn from_config(config: &SwConfig) -> Result<Self> {
        Ok(Self::new(config.precache_urls()?))
    }

    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// What an activation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub worker: ServiceWorkerId,
    pub tag: String,
    /// Stale stores that no longer exist, including any removed concurrently.
    pub deleted: Vec<String>,
    /// Clients that switched to this worker.
    pub claimed: usize,
}

/// Owns cache naming/versioning and the install/activate cycle.
pub struct LifecycleManager {
    registration: RwLock<Registration>,
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<Clients>,
}

impl LifecycleManager {
    pub fn new(storage: Arc<CacheStorage>, fetcher: Arc<dyn Fetcher>, clients: Arc<Clients>) -> Self {
        Self {
            registration: RwLock::new(Registration {
                installing: None,
                waiting: None,
                active: None,
            }),
            storage,
            fetcher,
            clients,
        }
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    /// Install a new generation: precache every manifest URL into its
    /// app-shell store. All-or-nothing; on failure the store is not touched and
    /// the worker becomes redundant.
    pub async fn install(
        &self,
        version: VersionConfig,
        manifest: &PrecacheManifest,
    ) -> Result<ServiceWorkerId> {
        let mut worker = ServiceWorker::new(version);
        let id = worker.id;
        worker.set_state(ServiceWorkerState::Installing);
        let tag = worker.version.tag.clone();
        let app_shell = worker.version.app_shell_cache();

        {
            let mut registration = self.registration.write().await;
            if let Some(mut superseded) = registration.installing.replace(worker) {
                superseded.set_state(ServiceWorkerState::Redundant);
            }
        }

        info!(tag = %tag, entries = manifest.len(), "Installing, precaching app shell");

        let fetched = match self.precache(manifest).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(tag = %tag, error = %e, "Install failed, keeping previous version");
                self.abandon_install(id).await;
                return Err(e);
            }
        };

        // Another install may have replaced ours while we were fetching.
        {
            let registration = self.registration.read().await;
            if registration.installing.as_ref().map(|w| w.id) != Some(id) {
                warn!(tag = %tag, "Install superseded by a newer install");
                return Err(PwaError::state(format!("install of {tag} was superseded")));
            }
        }

        let cache = self.storage.open(&app_shell).await;
        if let Err(e) = cache.put_all(fetched).await {
            error!(tag = %tag, error = %e, "Precache write failed, keeping previous version");
            self.abandon_install(id).await;
            return Err(PwaError::install_with_source(
                format!("writing {app_shell}"),
                e,
            ));
        }

        let mut registration = self.registration.write().await;
        match registration.installing.take() {
            Some(mut worker) if worker.id == id => {
                worker.set_state(ServiceWorkerState::Installed);
                if let Some(mut stale) = registration.waiting.replace(worker) {
                    stale.set_state(ServiceWorkerState::Redundant);
                }
                info!(tag = %tag, "Install completed");
                Ok(id)
            }
            other => {
                registration.installing = other;
                Err(PwaError::state(format!("install of {tag} was superseded")))
            }
        }
    }

    async fn precache(&self, manifest: &PrecacheManifest) -> Result<Vec<(Request, Response)>> {
        let fetches = manifest.urls().iter().map(|url| {
            let request = Request::get(url.clone());
            async move {
                let response = self
                    .fetcher
                    .fetch(request.clone())
                    .await
                    .map_err(|e| PwaError::install_with_source(format!("fetching {url}"), e))?;
                if !response.ok() {
                    return Err(PwaError::install(format!(
                        "fetching {url} returned {}",
                        response.status()
                    )));
                }
                debug!(url = %url, "Precached");
                Ok((request, response))
            }
        });
        try_join_all(fetches).await
    }

    async fn abandon_install(&self, id: ServiceWorkerId) {
        let mut registration = self.registration.write().await;
        if registration.installing.as_ref().map(|w| w.id) == Some(id) {
            if let Some(mut worker) = registration.installing.take() {
                worker.set_state(ServiceWorkerState::Redundant);
            }
        }
    }

    /// Promote the installed worker: delete every store not owned by its
    /// version, then take control of all open clients.
    pub async fn activate(&self) -> Result<ActivationReport> {
        let version = {
            let mut registration = self.registration.write().await;
            let mut worker = registration
                .waiting
                .take()
                .ok_or_else(|| PwaError::state("no installed worker to activate"))?;
            worker.set_state(ServiceWorkerState::Activating);
            let version = worker.version.clone();
            if let Some(mut old) = registration.active.replace(worker) {
                old.set_state(ServiceWorkerState::Redundant);
            }
            version
        };

        info!(tag = %version.tag, "Activating");

        for name in version.cache_names() {
            self.storage.open(&name).await;
        }

        let stale = self.storage.keys().await;
        let deleted = evict_stale(&self.storage, &version, stale).await;

        let worker = {
            let mut registration = self.registration.write().await;
            match registration.active.as_mut() {
                Some(active) if active.version == version => {
                    active.set_state(ServiceWorkerState::Activated);
                    active.id
                }
                _ => {
                    return Err(PwaError::state(format!(
                        "activation of {} was superseded",
                        version.tag
                    )))
                }
            }
        };

        let claimed = self.clients.claim(worker).await;
        info!(tag = %version.tag, deleted = deleted.len(), claimed, "Activation completed");

        Ok(ActivationReport {
            worker,
            tag: version.tag,
            deleted,
            claimed,
        })
    }

    /// Resume serving `version` from stores that survived a restart, without
    /// refetching the manifest. Fails if its app-shell store is missing.
    pub async fn restore(&self, version: VersionConfig) -> Result<ServiceWorkerId> {
        let app_shell = version.app_shell_cache();
        if !self.storage.has(&app_shell).await {
            return Err(PwaError::state(format!(
                "cannot restore {}: {app_shell} not found",
                version.tag
            )));
        }
        for name in version.cache_names() {
            self.storage.open(&name).await;
        }

        let mut worker = ServiceWorker::new(version);
        worker.set_state(ServiceWorkerState::Activated);
        let id = worker.id;
        let tag = worker.version.tag.clone();

        let mut registration = self.registration.write().await;
        if let Some(mut old) = registration.active.replace(worker) {
            old.set_state(ServiceWorkerState::Redundant);
        }
        drop(registration);

        let claimed = self.clients.claim(id).await;
        info!(tag = %tag, claimed, "Restored active version from storage");
        Ok(id)
    }

    /// Version of the worker currently serving requests.
    pub async fn active_version(&self) -> Option<VersionConfig> {
        self.registration
            .read()
            .await
            .active
            .as_ref()
            .filter(|w| w.is_serving())
            .map(|w| w.version.clone())
    }

    pub async fn active_worker(&self) -> Option<ServiceWorkerId> {
        self.registration
            .read()
            .await
            .active
            .as_ref()
            .filter(|w| w.is_serving())
            .map(|w| w.id)
    }

    pub async fn waiting_worker(&self) -> Option<ServiceWorkerId> {
        self.registration.read().await.waiting.as_ref().map(|w| w.id)
    }

    pub async fn installing_worker(&self) -> Option<ServiceWorkerId> {
        self.registration.read().await.installing.as_ref().map(|w| w.id)
    }

    /// State of the active worker, if there is one.
    pub async fn active_state(&self) -> Option<ServiceWorkerState> {
        self.registration.read().await.active.as_ref().map(|w| w.state)
    }
}

/// Delete every store in `names` that `version` does not own. A store already
/// gone by the time it is reached counts as deleted.
async fn evict_stale(storage: &CacheStorage, version: &VersionConfig, names: Vec<String>) -> Vec<String> {
    let mut deleted = Vec::new();
    for name in names {
        if version.owns(&name) {
            continue;
        }
        if storage.delete(&name).await {
            info!(cache = %name, "Deleted old cache");
        } else {
            debug!(cache = %name, "Old cache already removed");
        }
        deleted.push(name);
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RequestKey;
    use crate::clients::Client;
    use crate::testing::ScriptedFetcher;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn manifest(urls: &[&str]) -> PrecacheManifest {
        PrecacheManifest::new(urls.iter().map(|u| url(u)).collect())
    }

    fn manager(fetcher: Arc<ScriptedFetcher>) -> (LifecycleManager, Arc<CacheStorage>, Arc<Clients>) {
        let storage = Arc::new(CacheStorage::new());
        let (clients, _rx) = Clients::new();
        let clients = Arc::new(clients);
        let manager = LifecycleManager::new(Arc::clone(&storage), fetcher, Arc::clone(&clients));
        (manager, storage, clients)
    }

    #[tokio::test]
    async fn test_install_precaches_every_entry() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve("https://app.test/", 200, "index");
        fetcher.serve("https://app.test/app.js", 200, "js");
        let (manager, storage, _) = manager(Arc::clone(&fetcher));

        let id = manager
            .install(
                VersionConfig::new("v2.0"),
                &manifest(&["https://app.test/", "https://app.test/app.js"]),
            )
            .await
            .unwrap();

        assert_eq!(manager.waiting_worker().await, Some(id));
        let shell = storage.get("app-shell-v2.0").await.unwrap();
        assert_eq!(shell.len().await, 2);
        assert!(shell
            .match_request(&RequestKey::get(&url("https://app.test/app.js")))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_install_failure_leaves_no_store() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve("https://app.test/", 200, "index");
        let (manager, storage, _) = manager(Arc::clone(&fetcher));

        let result = manager
            .install(
                VersionConfig::new("v2.0"),
                &manifest(&["https://app.test/", "https://app.test/missing.js"]),
            )
            .await;

        assert!(matches!(result, Err(PwaError::Install { .. })));
        assert!(!storage.has("app-shell-v2.0").await);
        assert!(manager.waiting_worker().await.is_none());
        assert!(manager.installing_worker().await.is_none());
    }

    #[tokio::test]
    async fn test_install_rejects_error_status() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve("https://app.test/", 500, "boom");
        let (manager, storage, _) = manager(Arc::clone(&fetcher));

        let result = manager
            .install(VersionConfig::new("v2.0"), &manifest(&["https://app.test/"]))
            .await;

        assert!(result.is_err());
        assert!(storage.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_activate_without_install_is_state_error() {
        let (manager, _, _) = manager(Arc::new(ScriptedFetcher::new()));
        assert!(matches!(manager.activate().await, Err(PwaError::State(_))));
    }

    #[tokio::test]
    async fn test_activate_evicts_other_generations_and_claims() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve("https://app.test/", 200, "index");
        let (manager, storage, clients) = manager(Arc::clone(&fetcher));

        storage.open("app-shell-v1.0").await;
        storage.open("runtime-v1.0").await;
        storage.open("babinsa-monitoring-v1.0").await;
        clients.add(Client::window(url("https://app.test/"))).await;

        let id = manager
            .install(VersionConfig::new("v2.0"), &manifest(&["https://app.test/"]))
            .await
            .unwrap();
        let report = manager.activate().await.unwrap();

        assert_eq!(report.worker, id);
        assert_eq!(report.deleted.len(), 3);
        assert_eq!(report.claimed, 1);
        assert_eq!(
            storage.keys().await,
            vec!["app-shell-v2.0".to_string(), "runtime-v2.0".to_string()]
        );
        assert_eq!(manager.active_state().await, Some(ServiceWorkerState::Activated));
        assert_eq!(manager.active_version().await.unwrap().tag, "v2.0");
    }

    #[tokio::test]
    async fn test_failed_upgrade_keeps_previous_version_active() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve("https://app.test/", 200, "index");
        let (manager, storage, _) = manager(Arc::clone(&fetcher));

        manager
            .install(VersionConfig::new("v1.0"), &manifest(&["https://app.test/"]))
            .await
            .unwrap();
        manager.activate().await.unwrap();

        let upgrade = manager
            .install(
                VersionConfig::new("v2.0"),
                &manifest(&["https://app.test/", "https://app.test/new.js"]),
            )
            .await;
        assert!(upgrade.is_err());
        assert_eq!(manager.active_version().await.unwrap().tag, "v1.0");
        assert!(manager.activate().await.is_err());
        assert_eq!(
            storage.keys().await,
            vec!["app-shell-v1.0".to_string(), "runtime-v1.0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_restore_requires_persisted_app_shell() {
        let (manager, storage, _) = manager(Arc::new(ScriptedFetcher::new()));
        assert!(manager.restore(VersionConfig::new("v1.0")).await.is_err());
        assert!(manager.active_version().await.is_none());

        storage.open("app-shell-v1.0").await;
        manager.restore(VersionConfig::new("v1.0")).await.unwrap();
        assert_eq!(manager.active_state().await, Some(ServiceWorkerState::Activated));
        assert!(storage.has("runtime-v1.0").await);
    }

    #[tokio::test]
    async fn test_store_removed_concurrently_counts_as_deleted() {
        let storage = CacheStorage::new();
        storage.open("runtime-v1.0").await;
        storage.open("app-shell-v2.0").await;
        let listed = storage.keys().await;
        storage.delete("runtime-v1.0").await;

        let deleted = evict_stale(&storage, &VersionConfig::new("v2.0"), listed).await;
        assert_eq!(deleted, vec!["runtime-v1.0".to_string()]);
        assert_eq!(storage.keys().await, vec!["app-shell-v2.0".to_string()]);
    }
}
