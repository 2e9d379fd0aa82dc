//! Request-resolution strategies.
//!
//! Every strategy returns a [`Response`]; transport failures are absorbed by
//! the fallback chain and never reach the caller.

use std::sync::Arc;

use http::StatusCode;
use pwa_common::{PwaError, VersionConfig};
use pwa_net::{Fetcher, Request, Response};
use tracing::debug;
use url::{Origin, Url};

use crate::cache::{Cache, CacheStorage, RequestKey, StoredResponse};
use crate::tasks::BackgroundTasks;

mod cache_first;
mod network_first;

pub use cache_first::cache_first;
pub use network_first::network_first;

/// Body of the response synthesized when every fallback is exhausted.
pub const OFFLINE_BODY: &str = "Network error occurred";

/// Which strategy resolves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Network, then cache, then app shell, then 408.
    NetworkFirst,
    /// Cache with background revalidation, else network.
    CacheFirst,
}

impl StrategyKind {
    pub async fn run(self, ctx: &StrategyContext, request: Request) -> Response {
        match self {
            StrategyKind::NetworkFirst => network_first(ctx, request).await,
            StrategyKind::CacheFirst => cache_first(ctx, request).await,
        }
    }
}

/// Everything a strategy needs, bound to the version active when the request
/// arrived.
#[derive(Clone)]
pub struct StrategyContext {
    pub origin: Origin,
    pub storage: Arc<CacheStorage>,
    pub fetcher: Arc<dyn Fetcher>,
    pub tasks: Arc<BackgroundTasks>,
    pub version: VersionConfig,
    /// Fallback document for navigations.
    pub app_shell: RequestKey,
}

impl StrategyContext {
    /// Store names to search, freshest first: runtime writes win over the
    /// install-time precache.
    pub fn lookup_order(&self) -> Vec<String> {
        let runtime = self.version.runtime_cache();
        let mut names = vec![runtime.clone()];
        names.extend(self.version.cache_names().into_iter().filter(|n| *n != runtime));
        names
    }

    /// Look a key up in this version's stores.
    pub async fn lookup(&self, key: &RequestKey) -> Option<(Arc<Cache>, StoredResponse)> {
        self.storage.match_in(&self.lookup_order(), key).await
    }

    /// Whether `url` is on the application's own origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin
    }

    /// Write `response` into the runtime store without delaying the caller.
    /// If the store is gone (version cutover) the write is dropped.
    pub(crate) fn store_in_background(&self, key: RequestKey, response: Response) {
        let storage = Arc::clone(&self.storage);
        let runtime = self.version.runtime_cache();
        self.tasks.submit("runtime-write", async move {
            let entry = StoredResponse::snapshot(response);
            match storage.get(&runtime).await {
                Some(cache) => {
                    cache.put_entry(key, entry).await;
                    Ok(())
                }
                None => Err(PwaError::cache(format!(
                    "{runtime} no longer exists, dropping write for {}",
                    key.url
                ))),
            }
        });
    }
}

/// The response returned when network, cache and app shell all fail.
pub fn offline_response() -> Response {
    debug!("Synthesizing offline response");
    Response::synthetic(StatusCode::REQUEST_TIMEOUT, "text/plain", OFFLINE_BODY)
}
