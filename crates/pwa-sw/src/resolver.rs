//! Per-request entry point: filter, classify by origin, dispatch.

use std::sync::Arc;

use http::Method;
use pwa_common::{Result, SwConfig};
use pwa_net::{Fetcher, Request, Response};
use tracing::trace;
use url::Origin;

use crate::cache::RequestKey;
use crate::lifecycle::LifecycleManager;
use crate::strategy::{StrategyContext, StrategyKind};
use crate::tasks::BackgroundTasks;

/// Origin of a request relative to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginClass {
    SameOrigin,
    CrossOrigin,
}

/// Origin class → strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyTable {
    pub same_origin: StrategyKind,
    pub cross_origin: StrategyKind,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            same_origin: StrategyKind::NetworkFirst,
            cross_origin: StrategyKind::CacheFirst,
        }
    }
}

impl StrategyTable {
    pub fn select(&self, class: OriginClass) -> StrategyKind {
        match class {
            OriginClass::SameOrigin => self.same_origin,
            OriginClass::CrossOrigin => self.cross_origin,
        }
    }
}

/// Outcome of resolving one request.
#[derive(Debug)]
pub enum FetchDecision {
    /// Not intercepted; the host performs the request itself.
    PassThrough(Request),
    /// Answered by a strategy.
    Respond(Response),
}

impl FetchDecision {
    pub fn response(self) -> Option<Response> {
        match self {
            FetchDecision::Respond(response) => Some(response),
            FetchDecision::PassThrough(_) => None,
        }
    }
}

/// Stateless dispatcher from intercepted requests to strategies.
pub struct FetchResolver {
    origin: Origin,
    app_shell: RequestKey,
    bypass_schemes: Vec<String>,
    table: StrategyTable,
    lifecycle: Arc<LifecycleManager>,
    fetcher: Arc<dyn Fetcher>,
    tasks: Arc<BackgroundTasks>,
}

impl FetchResolver {
    pub fn new(
        config: &SwConfig,
        lifecycle: Arc<LifecycleManager>,
        fetcher: Arc<dyn Fetcher>,
        tasks: Arc<BackgroundTasks>,
    ) -> Result<Self> {
        Ok(Self {
            origin: config.origin.origin(),
            app_shell: RequestKey::get(&config.app_shell_url()?),
            bypass_schemes: config.bypass_schemes.clone(),
            table: StrategyTable::default(),
            lifecycle,
            fetcher,
            tasks,
        })
    }

    /// Override the origin-class → strategy mapping.
    pub fn with_table(mut self, table: StrategyTable) -> Self {
        self.table = table;
        self
    }

    pub fn classify(&self, request: &Request) -> OriginClass {
        if request.url.origin() == self.origin {
            OriginClass::SameOrigin
        } else {
            OriginClass::CrossOrigin
        }
    }

    /// GET on http(s), and not on a bypassed scheme.
    pub fn should_intercept(&self, request: &Request) -> bool {
        let scheme = request.url.scheme();
        request.method == Method::GET
            && matches!(scheme, "http" | "https")
            && !self.bypass_schemes.iter().any(|s| s == scheme)
    }

    /// Resolve one request. Filtered requests, and every request made before a
    /// version is active, pass through untouched.
    pub async fn resolve(&self, request: Request) -> FetchDecision {
        if !self.should_intercept(&request) {
            trace!(url = %request.url, method = %request.method, "Passing through");
            return FetchDecision::PassThrough(request);
        }

        let Some(version) = self.lifecycle.active_version().await else {
            trace!(url = %request.url, "No active version, passing through");
            return FetchDecision::PassThrough(request);
        };

        let class = self.classify(&request);
        let strategy = self.table.select(class);
        trace!(url = %request.url, ?class, ?strategy, tag = %version.tag, "Dispatching");

        let ctx = StrategyContext {
            origin: self.origin.clone(),
            storage: Arc::clone(self.lifecycle.storage()),
            fetcher: Arc::clone(&self.fetcher),
            tasks: Arc::clone(&self.tasks),
            version,
            app_shell: self.app_shell.clone(),
        };
        FetchDecision::Respond(strategy.run(&ctx, request).await)
    }
}
