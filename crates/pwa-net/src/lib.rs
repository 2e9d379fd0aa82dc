//! # PWA Net
//!
//! Request/response model and network access for the offline caching engine.
//!
//! ## Design Goals
//!
//! 1. **Single-read bodies**: a [`Response`] body is consumed by value; anything
//!    that must both return and persist a response duplicates it first
//! 2. **Fetcher seam**: strategies talk to the network only through [`Fetcher`]
//! 3. **Transport vs. HTTP status**: only transport failures are errors, any
//!    HTTP status (including 4xx/5xx) is a successful fetch

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use pwa_common::PwaError;
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{Fetcher, HttpFetcher, LoaderConfig};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable")]
    Offline,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<NetError> for PwaError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Timeout(after) => PwaError::Timeout(after),
            other => PwaError::transport_with_source("fetch failed", other),
        }
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the host issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Loading a full document.
    Navigate,
    /// Same-origin sub-resource.
    SameOrigin,
    /// Cross-origin sub-resource without CORS.
    #[default]
    NoCors,
    /// Cross-origin sub-resource with CORS.
    Cors,
}

/// An outgoing resource request as observed by the host.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            timeout: None,
        }
    }

    /// Create a sub-resource GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a navigation (document) GET request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).mode(RequestMode::Navigate)
    }

    /// Parse a URL and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// Response metadata, separated from the body.
#[derive(Debug, Clone)]
pub struct Parts {
    /// Final URL after redirects; `None` for synthesized responses.
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub redirected: bool,
}

/// HTTP response.
///
/// Deliberately not `Clone`: the body is read by consuming the response, so a
/// copy for persistence has to be taken with [`Response::duplicate`] before the
/// caller gets the original.
#[derive(Debug)]
pub struct Response {
    parts: Parts,
    body: Bytes,
}

impl Response {
    /// Build a response received from the network.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            parts: Parts {
                url: Some(url),
                status,
                headers,
                redirected: false,
            },
            body,
        }
    }

    /// Build a response with no URL (generated locally).
    pub fn synthetic(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self {
            parts: Parts {
                url: None,
                status,
                headers,
                redirected: false,
            },
            body: body.into(),
        }
    }

    /// Reassemble a response from its parts.
    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        Self { parts, body }
    }

    pub(crate) fn with_redirected(mut self, redirected: bool) -> Self {
        self.parts.redirected = redirected;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn url(&self) -> Option<&Url> {
        self.parts.url.as_ref()
    }

    pub fn redirected(&self) -> bool {
        self.parts.redirected
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.parts.status.is_success()
    }

    /// Content type header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Take an independent copy, to be persisted while the original is returned.
    pub fn duplicate(&self) -> Self {
        Self {
            parts: self.parts.clone(),
            body: self.body.clone(),
        }
    }

    /// Split into metadata and body.
    pub fn into_parts(self) -> (Parts, Bytes) {
        (self.parts, self.body)
    }

    /// Get the body as bytes.
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Get the body as text.
    pub fn text(self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}
