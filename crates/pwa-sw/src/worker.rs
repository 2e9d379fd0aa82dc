//! Event dispatch: one handler per event kind, looked up in a table.
//!
//! ```text
//! host ──SwEvent──▶ OfflineWorker::dispatch
//!                       │  handlers[event.kind()]
//!                       ├── Install / Activate ──▶ LifecycleManager
//!                       ├── Fetch ───────────────▶ FetchResolver ──▶ strategy
//!                       └── Push / Click / Sync ─▶ Relay ──HostCommand──▶ host
//! ```

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use hashbrown::HashMap;
use pwa_common::{PwaError, Result, SwConfig};
use pwa_net::{Fetcher, Request};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::cache::CacheStorage;
use crate::clients::{Clients, HostCommand};
use crate::lifecycle::{ActivationReport, LifecycleManager, PrecacheManifest, ServiceWorkerId};
use crate::relay::{ClickOutcome, Notification, Relay, SyncKind, SyncOutcome};
use crate::resolver::{FetchDecision, FetchResolver};
use crate::tasks::BackgroundTasks;

/// Event delivered by the host.
#[derive(Debug)]
pub enum SwEvent {
    Install,
    Activate,
    Fetch(Request),
    Push { data: Option<Bytes> },
    NotificationClick(Notification),
    Sync { tag: String },
    PeriodicSync { tag: String },
}

/// Discriminant of [`SwEvent`], the dispatch table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
    Sync,
    PeriodicSync,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Install,
        EventKind::Activate,
        EventKind::Fetch,
        EventKind::Push,
        EventKind::NotificationClick,
        EventKind::Sync,
        EventKind::PeriodicSync,
    ];
}

impl SwEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SwEvent::Install => EventKind::Install,
            SwEvent::Activate => EventKind::Activate,
            SwEvent::Fetch(_) => EventKind::Fetch,
            SwEvent::Push { .. } => EventKind::Push,
            SwEvent::NotificationClick(_) => EventKind::NotificationClick,
            SwEvent::Sync { .. } => EventKind::Sync,
            SwEvent::PeriodicSync { .. } => EventKind::PeriodicSync,
        }
    }
}

/// What handling an event produced.
#[derive(Debug)]
pub enum EventOutcome {
    Installed(ServiceWorkerId),
    Activated(ActivationReport),
    Fetch(FetchDecision),
    NotificationShown(Notification),
    Click(ClickOutcome),
    Sync(SyncOutcome),
}

/// Shared state every handler sees.
pub struct WorkerContext {
    pub config: SwConfig,
    pub manifest: PrecacheManifest,
    pub lifecycle: Arc<LifecycleManager>,
    pub resolver: FetchResolver,
    pub relay: Relay,
    pub clients: Arc<Clients>,
    pub tasks: Arc<BackgroundTasks>,
}

/// Handler for one event kind.
pub type EventHandler = for<'a> fn(&'a WorkerContext, SwEvent) -> BoxFuture<'a, Result<EventOutcome>>;

/// The worker: context plus dispatch table.
pub struct OfflineWorker {
    ctx: WorkerContext,
    handlers: HashMap<EventKind, EventHandler>,
}

impl OfflineWorker {
    /// Wire up an engine over `storage`. The receiver carries every
    /// [`HostCommand`] the engine issues.
    pub fn new(
        config: SwConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<CacheStorage>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HostCommand>)> {
        config.validate()?;

        let (clients, host_rx) = Clients::new();
        let clients = Arc::new(clients);
        let tasks = Arc::new(BackgroundTasks::new());
        let lifecycle = Arc::new(LifecycleManager::new(
            storage,
            Arc::clone(&fetcher),
            Arc::clone(&clients),
        ));
        let resolver = FetchResolver::new(
            &config,
            Arc::clone(&lifecycle),
            Arc::clone(&fetcher),
            Arc::clone(&tasks),
        )?;
        let relay = Relay::new(&config, Arc::clone(&clients), fetcher)?;
        let manifest = PrecacheManifest::from_config(&config)?;

        let ctx = WorkerContext {
            config,
            manifest,
            lifecycle,
            resolver,
            relay,
            clients,
            tasks,
        };
        Ok((
            Self {
                ctx,
                handlers: default_handlers(),
            },
            host_rx,
        ))
    }

    /// Replace the handler for `kind`.
    pub fn register(&mut self, kind: EventKind, handler: EventHandler) {
        self.handlers.insert(kind, handler);
    }

    /// Route `event` to its handler.
    #[instrument(skip_all, fields(kind = ?event.kind()))]
    pub async fn dispatch(&self, event: SwEvent) -> Result<EventOutcome> {
        let kind = event.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| PwaError::state(format!("no handler for {kind:?}")))?;
        debug!("Dispatching event");
        handler(&self.ctx, event).await
    }

    /// Resume the configured version from persisted stores.
    pub async fn restore(&self) -> Result<ServiceWorkerId> {
        self.ctx
            .lifecycle
            .restore(self.ctx.config.version.clone())
            .await
    }

    /// Wait for outstanding background writes and revalidations.
    pub async fn drain(&self) {
        self.ctx.tasks.drain().await;
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    pub fn config(&self) -> &SwConfig {
        &self.ctx.config
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.ctx.lifecycle
    }

    pub fn clients(&self) -> &Arc<Clients> {
        &self.ctx.clients
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        self.ctx.lifecycle.storage()
    }

    pub fn tasks(&self) -> &Arc<BackgroundTasks> {
        &self.ctx.tasks
    }
}

/// The default table: every [`EventKind`] mapped to its handler.
pub fn default_handlers() -> HashMap<EventKind, EventHandler> {
    let mut table: HashMap<EventKind, EventHandler> = HashMap::new();
    table.insert(EventKind::Install, on_install);
    table.insert(EventKind::Activate, on_activate);
    table.insert(EventKind::Fetch, on_fetch);
    table.insert(EventKind::Push, on_push);
    table.insert(EventKind::NotificationClick, on_notification_click);
    table.insert(EventKind::Sync, on_sync);
    table.insert(EventKind::PeriodicSync, on_sync);
    table
}

fn mismatched(expected: EventKind, event: &SwEvent) -> PwaError {
    PwaError::internal(format!(
        "{expected:?} handler received {:?} event",
        event.kind()
    ))
}

fn on_install(ctx: &WorkerContext, event: SwEvent) -> BoxFuture<'_, Result<EventOutcome>> {
    async move {
        if !matches!(event, SwEvent::Install) {
            return Err(mismatched(EventKind::Install, &event));
        }
        let id = ctx
            .lifecycle
            .install(ctx.config.version.clone(), &ctx.manifest)
            .await?;
        Ok(EventOutcome::Installed(id))
    }
    .boxed()
}

fn on_activate(ctx: &WorkerContext, event: SwEvent) -> BoxFuture<'_, Result<EventOutcome>> {
    async move {
        if !matches!(event, SwEvent::Activate) {
            return Err(mismatched(EventKind::Activate, &event));
        }
        Ok(EventOutcome::Activated(ctx.lifecycle.activate().await?))
    }
    .boxed()
}

fn on_fetch(ctx: &WorkerContext, event: SwEvent) -> BoxFuture<'_, Result<EventOutcome>> {
    async move {
        match event {
            SwEvent::Fetch(request) => Ok(EventOutcome::Fetch(ctx.resolver.resolve(request).await)),
            other => Err(mismatched(EventKind::Fetch, &other)),
        }
    }
    .boxed()
}

fn on_push(ctx: &WorkerContext, event: SwEvent) -> BoxFuture<'_, Result<EventOutcome>> {
    async move {
        match event {
            SwEvent::Push { data } => {
                let shown = ctx.relay.on_push(data.as_deref()).await?;
                Ok(EventOutcome::NotificationShown(shown))
            }
            other => Err(mismatched(EventKind::Push, &other)),
        }
    }
    .boxed()
}

fn on_notification_click(ctx: &WorkerContext, event: SwEvent) -> BoxFuture<'_, Result<EventOutcome>> {
    async move {
        match event {
            SwEvent::NotificationClick(notification) => Ok(EventOutcome::Click(
                ctx.relay.on_notification_click(&notification).await?,
            )),
            other => Err(mismatched(EventKind::NotificationClick, &other)),
        }
    }
    .boxed()
}

fn on_sync(ctx: &WorkerContext, event: SwEvent) -> BoxFuture<'_, Result<EventOutcome>> {
    async move {
        let (tag, kind) = match event {
            SwEvent::Sync { tag } => (tag, SyncKind::OneShot),
            SwEvent::PeriodicSync { tag } => (tag, SyncKind::Periodic),
            other => return Err(mismatched(EventKind::Sync, &other)),
        };
        Ok(EventOutcome::Sync(ctx.relay.on_sync(&tag, kind).await))
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFetcher;
    use http::StatusCode;
    use url::Url;

    fn config() -> SwConfig {
        SwConfig {
            origin: Url::parse("https://app.test/").unwrap(),
            precache: vec!["/".to_string(), "/offline.html".to_string()],
            ..Default::default()
        }
    }

    fn worker(fetcher: Arc<ScriptedFetcher>) -> (OfflineWorker, mpsc::UnboundedReceiver<HostCommand>) {
        OfflineWorker::new(config(), fetcher, Arc::new(CacheStorage::new())).unwrap()
    }

    #[test]
    fn test_every_kind_has_a_handler() {
        let table = default_handlers();
        for kind in EventKind::ALL {
            assert!(table.contains_key(&kind), "missing handler for {kind:?}");
        }
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(SwEvent::Install.kind(), EventKind::Install);
        assert_eq!(
            SwEvent::PeriodicSync { tag: "periodic-sync".into() }.kind(),
            EventKind::PeriodicSync
        );
        assert_eq!(SwEvent::Push { data: None }.kind(), EventKind::Push);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.version.tag.clear();
        let result = OfflineWorker::new(bad, Arc::new(ScriptedFetcher::new()), Arc::new(CacheStorage::new()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_install_activate_fetch_through_table() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve("https://app.test/", 200, "index");
        fetcher.serve("https://app.test/offline.html", 200, "offline");
        let (worker, _rx) = worker(Arc::clone(&fetcher));

        assert!(matches!(
            worker.dispatch(SwEvent::Install).await.unwrap(),
            EventOutcome::Installed(_)
        ));
        match worker.dispatch(SwEvent::Activate).await.unwrap() {
            EventOutcome::Activated(report) => assert_eq!(report.tag, worker.config().version.tag),
            other => panic!("unexpected outcome {other:?}"),
        }

        fetcher.set_offline(true);
        let request = Request::navigate(Url::parse("https://app.test/").unwrap());
        match worker.dispatch(SwEvent::Fetch(request)).await.unwrap() {
            EventOutcome::Fetch(FetchDecision::Respond(response)) => {
                assert_eq!(response.status(), StatusCode::OK);
                assert_eq!(response.text().unwrap(), "index");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registered_handler_replaces_default() {
        fn refuse(_: &WorkerContext, _: SwEvent) -> BoxFuture<'_, Result<EventOutcome>> {
            async { Err(PwaError::state("push disabled")) }.boxed()
        }

        let (mut worker, _rx) = worker(Arc::new(ScriptedFetcher::new()));
        worker.register(EventKind::Push, refuse);
        assert!(matches!(
            worker.dispatch(SwEvent::Push { data: None }).await,
            Err(PwaError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_mismatched_handler_is_internal_error() {
        let (mut worker, _rx) = worker(Arc::new(ScriptedFetcher::new()));
        worker.register(EventKind::Activate, on_install);
        assert!(matches!(
            worker.dispatch(SwEvent::Activate).await,
            Err(PwaError::Internal { .. })
        ));
    }

    #[tokio::test]
    async fn test_periodic_sync_routes_to_relay() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve("https://app.test/api/sync", 200, "{}");
        let (worker, _rx) = worker(Arc::clone(&fetcher));

        let outcome = worker
            .dispatch(SwEvent::PeriodicSync { tag: "periodic-sync".into() })
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            EventOutcome::Sync(SyncOutcome::Refreshed { notified: 0 })
        ));
    }
}
