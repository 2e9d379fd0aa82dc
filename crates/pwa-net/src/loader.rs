//! Network access: the [`Fetcher`] seam and its reqwest-backed implementation.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::{NetError, Request, Response};

/// Anything that can turn a [`Request`] into a [`Response`] over the network.
///
/// An `Err` means the transport failed; HTTP error statuses are `Ok`.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>>;
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("babinsa-offline/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

impl LoaderConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// [`Fetcher`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(timeout = ?config.default_timeout, "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    async fn send(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(timeout);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let redirected = url != request.url;

        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;

        trace!(
            url = %url,
            status = %status,
            redirected,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response::new(url, status, headers, body).with_redirected(redirected))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        Box::pin(self.send(request))
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> NetError {
    if err.is_timeout() {
        NetError::Timeout(timeout)
    } else if err.is_connect() {
        NetError::Offline
    } else {
        NetError::HttpError(err)
    }
}
