//! Network-first resolution for the application's own assets.

use http::StatusCode;
use pwa_net::{Request, Response};
use tracing::{debug, info, warn};

use super::{offline_response, StrategyContext};
use crate::cache::RequestKey;

/// Network, then cached entry, then app shell (navigations only), then 408.
///
/// A 200 response from our own origin is returned as-is while a duplicate is
/// written to the runtime store in the background. Any other status passes
/// through uncached; only a transport failure triggers the fallbacks.
pub async fn network_first(ctx: &StrategyContext, request: Request) -> Response {
    let key = RequestKey::from_request(&request);
    let navigation = request.is_navigation();
    let url = request.url.clone();

    match ctx.fetcher.fetch(request).await {
        Ok(response) => {
            let basic = response.url().is_some_and(|u| ctx.is_same_origin(u));
            if response.status() == StatusCode::OK && basic {
                ctx.store_in_background(key, response.duplicate());
            } else {
                debug!(url = %url, status = %response.status(), basic, "Not caching response");
            }
            response
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Fetch failed, falling back to cache");

            if let Some((cache, entry)) = ctx.lookup(&key).await {
                info!(url = %url, cache = %cache.name(), "Serving from cache");
                return entry.to_response();
            }

            if navigation {
                if let Some((_, shell)) = ctx.lookup(&ctx.app_shell).await {
                    info!(url = %url, shell = %ctx.app_shell.url, "Serving app shell");
                    return shell.to_response();
                }
            }

            offline_response()
        }
    }
}
