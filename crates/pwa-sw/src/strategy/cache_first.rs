//! Cache-first resolution with stale-while-revalidate, for third-party assets.

use std::sync::Arc;

use http::StatusCode;
use pwa_common::PwaError;
use pwa_net::{Request, Response};
use tracing::{debug, warn};

use super::{offline_response, StrategyContext};
use crate::cache::{Cache, RequestKey, StoredResponse};

/// Cached entry if present (refreshed in the background), otherwise the
/// network response, uncached. A cold miss never writes.
pub async fn cache_first(ctx: &StrategyContext, request: Request) -> Response {
    let key = RequestKey::from_request(&request);

    if let Some((cache, entry)) = ctx.lookup(&key).await {
        debug!(url = %request.url, cache = %cache.name(), "Cache hit, revalidating in background");
        revalidate(ctx, cache, key, request);
        return entry.to_response();
    }

    let url = request.url.clone();
    match ctx.fetcher.fetch(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %url, error = %e, "Cache miss and fetch failed");
            offline_response()
        }
    }
}

/// Refetch `request` and overwrite the entry in the store that answered.
fn revalidate(ctx: &StrategyContext, cache: Arc<Cache>, key: RequestKey, request: Request) {
    let fetcher = Arc::clone(&ctx.fetcher);
    ctx.tasks.submit("revalidate", async move {
        let url = request.url.clone();
        let response = fetcher.fetch(request).await?;
        if response.status() != StatusCode::OK {
            return Err(PwaError::cache(format!(
                "revalidation of {url} returned {}",
                response.status()
            )));
        }
        cache.put_entry(key, StoredResponse::snapshot(response)).await;
        debug!(url = %url, cache = %cache.name(), "Revalidated");
        Ok::<(), PwaError>(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::fixtures::{cached_body, context, seed, url};
    use crate::testing::ScriptedFetcher;
    use bytes::Bytes;

    const FONT_CSS: &str = "https://cdn.example/font.css";

    #[tokio::test]
    async fn test_hit_returns_without_waiting_on_network() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(FONT_CSS, 200, "v2");
        fetcher.pause();
        let ctx = context(Arc::clone(&fetcher)).await;
        seed(&ctx, "app-shell-v1", FONT_CSS, "v1").await;

        let response = cache_first(&ctx, Request::get(url(FONT_CSS))).await;
        assert_eq!(response.bytes(), Bytes::from_static(b"v1"));
        assert_eq!(ctx.tasks.completed(), 0);

        fetcher.resume();
        ctx.tasks.drain().await;
        assert_eq!(cached_body(&ctx, FONT_CSS).await.unwrap(), Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn test_revalidation_updates_store_that_answered() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(FONT_CSS, 200, "v2");
        let ctx = context(Arc::clone(&fetcher)).await;
        seed(&ctx, "app-shell-v1", FONT_CSS, "v1").await;

        cache_first(&ctx, Request::get(url(FONT_CSS))).await;
        ctx.tasks.drain().await;

        let shell = ctx.storage.get("app-shell-v1").await.unwrap();
        let entry = shell.match_request(&RequestKey::get(&url(FONT_CSS))).await.unwrap();
        assert_eq!(entry.body, Bytes::from_static(b"v2"));
        assert!(ctx.storage.get("runtime-v1").await.unwrap().is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_revalidation_keeps_entry() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.fail(FONT_CSS);
        let ctx = context(Arc::clone(&fetcher)).await;
        seed(&ctx, "runtime-v1", FONT_CSS, "v1").await;

        let response = cache_first(&ctx, Request::get(url(FONT_CSS))).await;
        assert_eq!(response.status(), StatusCode::OK);

        ctx.tasks.drain().await;
        assert_eq!(ctx.tasks.failures(), 1);
        assert_eq!(cached_body(&ctx, FONT_CSS).await.unwrap(), Bytes::from_static(b"v1"));
    }

    #[tokio::test]
    async fn test_non_200_revalidation_is_discarded() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(FONT_CSS, 503, "maintenance");
        let ctx = context(Arc::clone(&fetcher)).await;
        seed(&ctx, "runtime-v1", FONT_CSS, "v1").await;

        cache_first(&ctx, Request::get(url(FONT_CSS))).await;
        ctx.tasks.drain().await;
        assert_eq!(cached_body(&ctx, FONT_CSS).await.unwrap(), Bytes::from_static(b"v1"));
    }

    #[tokio::test]
    async fn test_cold_miss_fetches_without_caching() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(FONT_CSS, 200, "fresh");
        let ctx = context(Arc::clone(&fetcher)).await;

        let response = cache_first(&ctx, Request::get(url(FONT_CSS))).await;
        assert_eq!(response.bytes(), Bytes::from_static(b"fresh"));

        ctx.tasks.drain().await;
        assert!(cached_body(&ctx, FONT_CSS).await.is_none());
        assert_eq!(fetcher.call_count(FONT_CSS), 1);
    }

    #[tokio::test]
    async fn test_cold_miss_offline_is_408() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.set_offline(true);
        let ctx = context(Arc::clone(&fetcher)).await;

        let response = cache_first(&ctx, Request::get(url(FONT_CSS))).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
