//! Push notifications, notification clicks and background data refresh.
//!
//! This relay never touches cache contents. Everything it produces reaches the
//! host as [`HostCommand`]s through [`Clients`].

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use pwa_common::{NotificationDefaults, PwaError, Result, SwConfig};
use pwa_net::{Fetcher, Request};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::clients::{ClientQuery, Clients, HostCommand};

/// Message type posted to clients after a background refresh.
pub const BACKGROUND_REFRESH: &str = "BACKGROUND_REFRESH";

/// Tag of the refresh confirmation, so repeated refreshes replace each other.
pub const REFRESH_TAG: &str = "background-refresh";

/// Inbound push payload; every field optional.
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    url: Option<String>,
    #[serde(flatten)]
    extra: Map<String, JsonValue>,
}

/// What a push asks to show.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationIntent {
    pub title: String,
    pub body: String,
    pub url: String,
    /// Any payload fields beyond title/body/url; `Null` when there are none.
    pub metadata: JsonValue,
}

impl NotificationIntent {
    /// The intent used when no usable payload arrives.
    pub fn defaults(defaults: &NotificationDefaults) -> Self {
        Self {
            title: defaults.title.clone(),
            body: defaults.body.clone(),
            url: defaults.url.clone(),
            metadata: JsonValue::Null,
        }
    }

    /// Decode a push payload. Absent or undecodable data yields the defaults;
    /// missing or empty fields fall back individually.
    pub fn from_payload(data: Option<&[u8]>, defaults: &NotificationDefaults) -> Self {
        let payload = match data.filter(|d| !d.is_empty()) {
            None => PushPayload::default(),
            Some(raw) => match serde_json::from_slice::<PushPayload>(raw) {
                Ok(payload) => payload,
                Err(e) => {
                    let err = PwaError::Payload(e.to_string());
                    warn!(error = %err, "Undecodable push payload, using defaults");
                    PushPayload::default()
                }
            },
        };

        let pick = |value: Option<String>, fallback: &str| {
            value
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };

        Self {
            title: pick(payload.title, &defaults.title),
            body: pick(payload.body, &defaults.body),
            url: pick(payload.url, &defaults.url),
            metadata: if payload.extra.is_empty() {
                JsonValue::Null
            } else {
                JsonValue::Object(payload.extra)
            },
        }
    }
}

/// A notification as handed to the host for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Replacement tag; a new notification with the same tag replaces the old.
    pub tag: Option<String>,
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub vibrate: Vec<u32>,
    /// Absolute URL to open on click, if the notification is clickable.
    pub target: Option<Url>,
    /// `{"url": <target>, "metadata": <extra payload fields>}` for push
    /// notifications; `Null` otherwise.
    pub data: JsonValue,
}

fn notification_data(target: &Url, metadata: JsonValue) -> JsonValue {
    serde_json::json!({
        "url": target.as_str(),
        "metadata": metadata,
    })
}

/// Message posted to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    /// ISO-8601 / RFC 3339, UTC, millisecond precision.
    pub timestamp: String,
}

impl ClientMessage {
    pub fn background_refresh(at: DateTime<Utc>) -> Self {
        Self {
            kind: BACKGROUND_REFRESH.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// How a notification click was routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An open window already showed the target.
    Focused { client_id: String },
    /// A new window was opened.
    Opened { client_id: String },
    /// The notification carried no target.
    Dismissed,
}

/// Kind of host-scheduled sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    OneShot,
    Periodic,
}

/// Result of a sync event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Tag not ours.
    Ignored,
    /// Endpoint answered; this many clients were told.
    Refreshed { notified: usize },
    /// Endpoint failed; left to the host's retry policy.
    Failed { reason: String },
}

/// Relay for push, click and sync events.
pub struct Relay {
    defaults: NotificationDefaults,
    origin: Url,
    refresh_url: Url,
    sync_tag: String,
    periodic_sync_tag: String,
    clients: Arc<Clients>,
    fetcher: Arc<dyn Fetcher>,
}

impl Relay {
    pub fn new(config: &SwConfig, clients: Arc<Clients>, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        Ok(Self {
            defaults: config.notification.clone(),
            origin: config.origin.clone(),
            refresh_url: config.refresh_url()?,
            sync_tag: config.sync_tag.clone(),
            periodic_sync_tag: config.periodic_sync_tag.clone(),
            clients,
            fetcher,
        })
    }

    /// Build and display the notification for a push.
    pub async fn on_push(&self, data: Option<&[u8]>) -> Result<Notification> {
        let intent = NotificationIntent::from_payload(data, &self.defaults);
        let target = match self.origin.join(&intent.url) {
            Ok(target) => target,
            Err(e) => {
                let err = PwaError::Payload(format!("invalid url {:?}: {e}", intent.url));
                warn!(error = %err, "Push target unusable, using default url");
                self.origin.join(&self.defaults.url)?
            }
        };

        let notification = Notification {
            tag: None,
            title: intent.title,
            body: intent.body,
            icon: Some(self.defaults.icon.clone()),
            badge: Some(self.defaults.badge.clone()),
            vibrate: self.defaults.vibrate.clone(),
            data: notification_data(&target, intent.metadata),
            target: Some(target),
        };

        info!(title = %notification.title, "Showing push notification");
        self.clients
            .send(HostCommand::ShowNotification(notification.clone()))?;
        Ok(notification)
    }

    /// Close the notification, then focus a window already at its target or
    /// open a new one there.
    pub async fn on_notification_click(&self, notification: &Notification) -> Result<ClickOutcome> {
        self.clients.send(HostCommand::CloseNotification {
            tag: notification.tag.clone(),
            title: notification.title.clone(),
        })?;

        let Some(target) = notification.target.as_ref() else {
            return Ok(ClickOutcome::Dismissed);
        };

        let windows = self.clients.match_all(ClientQuery::all_windows()).await;
        if let Some(existing) = windows.iter().find(|c| c.url == *target) {
            debug!(client = %existing.id, url = %target, "Focusing existing window");
            let client = self.clients.focus(&existing.id).await?;
            return Ok(ClickOutcome::Focused {
                client_id: client.id,
            });
        }

        debug!(url = %target, "Opening new window");
        let client = self.clients.open_window(target.clone()).await?;
        Ok(ClickOutcome::Opened {
            client_id: client.id,
        })
    }

    /// Handle a background or periodic sync. Failures are logged and reported,
    /// never retried here.
    pub async fn on_sync(&self, tag: &str, kind: SyncKind) -> SyncOutcome {
        let expected = match kind {
            SyncKind::OneShot => &self.sync_tag,
            SyncKind::Periodic => &self.periodic_sync_tag,
        };
        if tag != expected {
            debug!(tag, ?kind, "Ignoring sync with unknown tag");
            return SyncOutcome::Ignored;
        }

        info!(tag, ?kind, "Background refresh triggered");
        match self.refresh().await {
            Ok(notified) => {
                info!(notified, "Background refresh successful");
                SyncOutcome::Refreshed { notified }
            }
            Err(e) => {
                error!(error = %e, "Background refresh failed");
                SyncOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn refresh(&self) -> Result<usize> {
        let response = self
            .fetcher
            .fetch(Request::get(self.refresh_url.clone()))
            .await
            .map_err(|e| PwaError::Refresh(e.to_string()))?;
        if !response.ok() {
            return Err(PwaError::Refresh(format!(
                "{} returned {}",
                self.refresh_url,
                response.status()
            )));
        }
        let _data: JsonValue = response
            .json()
            .map_err(|e| PwaError::Refresh(format!("invalid refresh body: {e}")))?;

        let message = ClientMessage::background_refresh(Utc::now());
        let mut notified = 0;
        for client in self.clients.match_all(ClientQuery::everything()).await {
            match self.clients.post_message(&client.id, &message).await {
                Ok(()) => notified += 1,
                Err(e) => warn!(client = %client.id, error = %e, "Could not notify client"),
            }
        }

        if self.defaults.notify_on_refresh {
            let confirmation = Notification {
                tag: Some(REFRESH_TAG.to_string()),
                title: self.defaults.refresh_title.clone(),
                body: self.defaults.refresh_body.clone(),
                icon: Some(self.defaults.icon.clone()),
                badge: None,
                vibrate: Vec::new(),
                target: None,
                data: JsonValue::Null,
            };
            self.clients
                .send(HostCommand::ShowNotification(confirmation))?;
        }

        Ok(notified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::Client;
    use crate::testing::ScriptedFetcher;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    fn relay(fetcher: Arc<ScriptedFetcher>) -> (Relay, Arc<Clients>, mpsc::UnboundedReceiver<HostCommand>) {
        let config = SwConfig {
            origin: Url::parse("https://app.test/").unwrap(),
            ..Default::default()
        };
        let (clients, rx) = Clients::new();
        let clients = Arc::new(clients);
        let relay = Relay::new(&config, Arc::clone(&clients), fetcher).unwrap();
        (relay, clients, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<HostCommand>) -> Vec<HostCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn test_absent_payload_yields_documented_defaults() {
        let intent = NotificationIntent::from_payload(None, &NotificationDefaults::default());
        assert_eq!(
            intent,
            NotificationIntent {
                title: "Monitoring Babinsa".to_string(),
                body: "Ada update baru dari sistem monitoring".to_string(),
                url: "/".to_string(),
                metadata: JsonValue::Null,
            }
        );
        assert_eq!(
            NotificationIntent::from_payload(Some(b"".as_slice()), &NotificationDefaults::default()),
            intent
        );
    }

    #[test]
    fn test_garbage_payload_yields_defaults() {
        let defaults = NotificationDefaults::default();
        let intent = NotificationIntent::from_payload(Some(b"not json".as_slice()), &defaults);
        assert_eq!(intent, NotificationIntent::defaults(&defaults));

        let intent = NotificationIntent::from_payload(Some(br#""just a string""#.as_slice()), &defaults);
        assert_eq!(intent, NotificationIntent::defaults(&defaults));
    }

    #[tokio::test]
    async fn test_unparseable_target_falls_back_to_default_url() {
        let (relay, _clients, mut rx) = relay(Arc::new(ScriptedFetcher::new()));
        let notification = relay
            .on_push(Some(br#"{"title":"Laporan","url":"http://[bad"}"#.as_slice()))
            .await
            .unwrap();

        assert_eq!(notification.title, "Laporan");
        assert_eq!(notification.target.as_ref().unwrap().as_str(), "https://app.test/");
        assert_eq!(notification.data["url"], "https://app.test/");
        assert_eq!(drain(&mut rx), vec![HostCommand::ShowNotification(notification)]);
    }

    #[test]
    fn test_partial_payload_and_metadata() {
        let defaults = NotificationDefaults::default();
        let intent = NotificationIntent::from_payload(
            Some(br#"{"title":"Laporan baru","url":"/reports/7","priority":"high"}"#.as_slice()),
            &defaults,
        );
        assert_eq!(intent.title, "Laporan baru");
        assert_eq!(intent.body, defaults.body);
        assert_eq!(intent.url, "/reports/7");
        assert_eq!(intent.metadata["priority"], "high");
    }

    #[test]
    fn test_client_message_schema() {
        let at = Utc.with_ymd_and_hms(2026, 10, 17, 8, 30, 0).unwrap();
        let message = ClientMessage::background_refresh(at);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "BACKGROUND_REFRESH");
        assert_eq!(json["timestamp"], "2026-10-17T08:30:00.000Z");
    }

    #[tokio::test]
    async fn test_push_shows_notification_with_presentation() {
        let (relay, _clients, mut rx) = relay(Arc::new(ScriptedFetcher::new()));
        let notification = relay.on_push(None).await.unwrap();

        assert_eq!(notification.target.as_ref().unwrap().as_str(), "https://app.test/");
        assert_eq!(notification.icon.as_deref(), Some("/icon-192.png"));
        assert_eq!(notification.badge.as_deref(), Some("/icon-96.png"));
        assert_eq!(notification.vibrate, vec![200, 100, 200]);
        assert_eq!(notification.data["url"], "https://app.test/");
        assert_eq!(notification.data["metadata"], JsonValue::Null);
        assert_eq!(
            drain(&mut rx),
            vec![HostCommand::ShowNotification(notification)]
        );
    }

    #[tokio::test]
    async fn test_click_focuses_exact_match() {
        let (relay, clients, mut rx) = relay(Arc::new(ScriptedFetcher::new()));
        let window = Client::window(Url::parse("https://app.test/reports/7").unwrap());
        let id = window.id.clone();
        clients.add(window).await;
        clients.add(Client::window(Url::parse("https://app.test/").unwrap())).await;

        let notification = relay
            .on_push(Some(br#"{"url":"/reports/7"}"#.as_slice()))
            .await
            .unwrap();
        drain(&mut rx);

        let outcome = relay.on_notification_click(&notification).await.unwrap();
        assert_eq!(outcome, ClickOutcome::Focused { client_id: id.clone() });
        let commands = drain(&mut rx);
        assert!(matches!(commands[0], HostCommand::CloseNotification { .. }));
        assert_eq!(commands[1], HostCommand::Focus { client_id: id });
    }

    #[tokio::test]
    async fn test_click_opens_window_when_no_match() {
        let (relay, clients, _rx) = relay(Arc::new(ScriptedFetcher::new()));
        clients
            .add(Client::window(Url::parse("https://app.test/reports").unwrap()))
            .await;

        let notification = relay.on_push(Some(br#"{"url":"/reports/9"}"#.as_slice())).await.unwrap();
        match relay.on_notification_click(&notification).await.unwrap() {
            ClickOutcome::Opened { client_id } => {
                let opened = clients.get(&client_id).await.unwrap();
                assert_eq!(opened.url.as_str(), "https://app.test/reports/9");
            }
            other => panic!("expected a new window, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sync_notifies_clients_and_confirms() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve("https://app.test/api/sync", 200, r#"{"updated":3}"#);
        let (relay, clients, mut rx) = relay(Arc::clone(&fetcher));
        clients.add(Client::window(Url::parse("https://app.test/").unwrap())).await;
        clients.add(Client::window(Url::parse("https://app.test/map").unwrap())).await;

        let outcome = relay.on_sync("refresh-data", SyncKind::OneShot).await;
        assert_eq!(outcome, SyncOutcome::Refreshed { notified: 2 });

        let commands = drain(&mut rx);
        let messages = commands
            .iter()
            .filter(|c| matches!(c, HostCommand::PostMessage { message, .. } if message.kind == BACKGROUND_REFRESH))
            .count();
        assert_eq!(messages, 2);
        assert!(matches!(
            commands.last(),
            Some(HostCommand::ShowNotification(n)) if n.title == "Data tersinkronisasi"
        ));
    }

    #[tokio::test]
    async fn test_sync_failure_is_reported_not_retried() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve("https://app.test/api/sync", 502, "bad gateway");
        let (relay, _clients, mut rx) = relay(Arc::clone(&fetcher));

        let outcome = relay.on_sync("periodic-sync", SyncKind::Periodic).await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        assert_eq!(fetcher.call_count("https://app.test/api/sync"), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_sync_offline_fails_quietly() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.set_offline(true);
        let (relay, _clients, _rx) = relay(Arc::clone(&fetcher));

        let outcome = relay.on_sync("refresh-data", SyncKind::OneShot).await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_sync_unknown_tag_ignored() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let (relay, _clients, _rx) = relay(Arc::clone(&fetcher));

        assert_eq!(relay.on_sync("sync-data", SyncKind::OneShot).await, SyncOutcome::Ignored);
        assert_eq!(relay.on_sync("refresh-data", SyncKind::Periodic).await, SyncOutcome::Ignored);
        assert!(fetcher.calls().is_empty());
    }
}
