//! # Offline caching engine
//!
//! Client-side request interception for the monitoring dashboard: a versioned
//! cache lifecycle, per-origin fetch strategies and a notification/sync relay.
//!
//! ## Features
//!
//! - **Lifecycle**: all-or-nothing precache on install, eviction of every other
//!   version's stores on activate, client claim
//! - **Fetch Resolver**: GET-only interception, origin classification,
//!   table-driven strategy dispatch
//! - **Network-First**: own-origin assets; cache, app shell, then a synthesized
//!   408 when offline
//! - **Cache-First**: third-party assets, stale-while-revalidate
//! - **Relay**: push notifications, click routing, background refresh
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker (event dispatch table)
//!     ├── LifecycleManager
//!     │       └── CacheStorage
//!     │               └── Cache (app-shell-<tag>, runtime-<tag>)
//!     │                       └── RequestKey → StoredResponse
//!     ├── FetchResolver
//!     │       └── StrategyTable ──▶ network_first | cache_first
//!     │                                   └── BackgroundTasks (write-behind)
//!     └── Relay ──▶ Clients ──HostCommand──▶ host
//! ```

pub mod cache;
pub mod clients;
pub mod lifecycle;
pub mod relay;
pub mod resolver;
pub mod strategy;
pub mod tasks;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;

pub use cache::{Cache, CacheStorage, RequestKey, StoredResponse};
pub use clients::{Client, ClientQuery, ClientType, Clients, HostCommand};
pub use lifecycle::{
    ActivationReport, LifecycleManager, PrecacheManifest, ServiceWorker, ServiceWorkerId,
    ServiceWorkerState,
};
pub use relay::{
    ClickOutcome, ClientMessage, Notification, NotificationIntent, Relay, SyncKind, SyncOutcome,
    BACKGROUND_REFRESH,
};
pub use resolver::{FetchDecision, FetchResolver, OriginClass, StrategyTable};
pub use strategy::{offline_response, StrategyContext, StrategyKind, OFFLINE_BODY};
pub use tasks::BackgroundTasks;
pub use worker::{EventHandler, EventKind, EventOutcome, OfflineWorker, SwEvent, WorkerContext};
