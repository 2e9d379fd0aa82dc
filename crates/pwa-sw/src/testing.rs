//! In-memory [`Fetcher`] with scripted responses, for tests.
//!
//! Compiled for this crate's own tests and behind the `testing` feature.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use futures::future::BoxFuture;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderValue, StatusCode};
use pwa_net::{Fetcher, NetError, Request, Response};
use tokio::sync::watch;
use url::Url;

#[derive(Debug, Clone)]
enum Route {
    Respond {
        status: u16,
        body: Bytes,
        content_type: Option<&'static str>,
        final_url: Option<Url>,
    },
    Fail,
}

/// Scripted network: per-URL responses, an offline switch, a pause gate and a
/// call log. Unknown URLs answer 404.
#[derive(Debug)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
    paused: watch::Sender<bool>,
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            paused,
        }
    }

    fn route(&self, url: &str, route: Route) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize(url), route);
    }

    /// Answer `url` with `status` and `body`.
    pub fn serve(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        self.route(
            url,
            Route::Respond {
                status,
                body: body.into(),
                content_type: None,
                final_url: None,
            },
        );
    }

    /// Answer `url` with a typed body.
    pub fn serve_typed(&self, url: &str, status: u16, content_type: &'static str, body: impl Into<Bytes>) {
        self.route(
            url,
            Route::Respond {
                status,
                body: body.into(),
                content_type: Some(content_type),
                final_url: None,
            },
        );
    }

    /// Answer `url` as if it had been redirected to `final_url`.
    pub fn serve_redirected(&self, url: &str, final_url: &str, body: impl Into<Bytes>) {
        let final_url = Url::parse(final_url).ok();
        self.route(
            url,
            Route::Respond {
                status: 200,
                body: body.into(),
                content_type: None,
                final_url,
            },
        );
    }

    /// Make `url` fail at the transport level.
    pub fn fail(&self, url: &str) {
        self.route(url, Route::Fail);
    }

    /// Toggle every fetch failing as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Hold every fetch until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// URLs fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        let url = normalize(url);
        self.calls().iter().filter(|c| **c == url).count()
    }

    async fn respond(&self, request: Request) -> Result<Response, NetError> {
        let url = request.url.to_string();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.clone());

        let mut gate = self.paused.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = gate.wait_for(|paused| !*paused).await;

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }

        let route = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&url)
            .cloned();

        match route {
            Some(Route::Fail) => Err(NetError::RequestFailed(format!("scripted failure for {url}"))),
            Some(Route::Respond {
                status,
                body,
                content_type,
                final_url,
            }) => {
                let mut headers = HeaderMap::new();
                if let Some(ct) = content_type {
                    headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static(ct));
                }
                let status = StatusCode::from_u16(status)
                    .map_err(|e| NetError::RequestFailed(e.to_string()))?;
                Ok(Response::new(
                    final_url.unwrap_or(request.url),
                    status,
                    headers,
                    body,
                ))
            }
            None => Ok(Response::new(
                request.url,
                StatusCode::NOT_FOUND,
                HeaderMap::new(),
                Bytes::new(),
            )),
        }
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        Box::pin(self.respond(request))
    }
}

fn normalize(url: &str) -> String {
    Url::parse(url)
        .map(String::from)
        .unwrap_or_else(|_| url.to_string())
}
