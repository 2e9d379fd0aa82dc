//! Open client windows and the command channel back to the host.
//!
//! Everything the engine wants the host to do (show a notification, focus or
//! open a window, deliver a message) is emitted as a [`HostCommand`].

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use pwa_common::{OptionExt, PwaError, Result};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use url::Url;

use crate::lifecycle::ServiceWorkerId;
use crate::relay::{ClientMessage, Notification};

/// A client (page or worker) of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub client_type: ClientType,
    pub focused: bool,
    /// Worker currently controlling this client, if any.
    pub controller: Option<ServiceWorkerId>,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

impl Client {
    /// A visible window client at `url`, not yet controlled.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientQuery {
    /// Also return clients not controlled by `controller`.
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
    /// Worker whose controlled clients are wanted.
    pub controller: Option<ServiceWorkerId>,
}

impl ClientQuery {
    /// Every window, controlled or not.
    pub fn all_windows() -> Self {
        Self {
            include_uncontrolled: true,
            client_type: ClientType::Window,
            controller: None,
        }
    }

    /// Every client of any type.
    pub fn everything() -> Self {
        Self {
            include_uncontrolled: true,
            client_type: ClientType::All,
            controller: None,
        }
    }
}

/// Instruction for the host platform.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    ShowNotification(Notification),
    CloseNotification { tag: Option<String>, title: String },
    Focus { client_id: String },
    OpenWindow { client_id: String, url: Url },
    PostMessage { client_id: String, message: ClientMessage },
}

/// Registry of known clients.
#[derive(Debug)]
pub struct Clients {
    clients: RwLock<HashMap<String, Client>>,
    host_tx: mpsc::UnboundedSender<HostCommand>,
}

impl Clients {
    /// Create the registry and the receiving end of the host command channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostCommand>) {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        (
            Self {
                clients: RwLock::new(HashMap::new()),
                host_tx,
            },
            host_rx,
        )
    }

    /// Register a client reported by the host.
    pub async fn add(&self, client: Client) {
        self.clients.write().await.insert(client.id.clone(), client);
    }

    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Clients matching `query`, ordered by id for determinism.
    pub async fn match_all(&self, query: ClientQuery) -> Vec<Client> {
        let mut matched: Vec<Client> = self
            .clients
            .read()
            .await
            .values()
            .filter(|c| {
                query.include_uncontrolled
                    || (c.controller.is_some() && c.controller == query.controller)
            })
            .filter(|c| match query.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Take control of every client. Returns how many changed controller.
    pub async fn claim(&self, worker: ServiceWorkerId) -> usize {
        let mut claimed = 0;
        for client in self.clients.write().await.values_mut() {
            if client.controller != Some(worker) {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        debug!(?worker, claimed, "Clients claimed");
        claimed
    }

    /// Focus a window client.
    pub async fn focus(&self, id: &str) -> Result<Client> {
        let client = {
            let mut clients = self.clients.write().await;
            let client = clients
                .get_mut(id)
                .ok_or_not_found(format!("client {id}"))?;
            if client.client_type != ClientType::Window {
                return Err(PwaError::state("can only focus window clients"));
            }
            client.focused = true;
            client.clone()
        };
        self.send(HostCommand::Focus {
            client_id: client.id.clone(),
        })?;
        Ok(client)
    }

    /// Open a new focused window at `url`.
    pub async fn open_window(&self, url: Url) -> Result<Client> {
        let mut client = Client::window(url.clone());
        client.focused = true;
        self.add(client.clone()).await;
        self.send(HostCommand::OpenWindow {
            client_id: client.id.clone(),
            url,
        })?;
        Ok(client)
    }

    /// Deliver a message to one client.
    pub async fn post_message(&self, id: &str, message: &ClientMessage) -> Result<()> {
        if !self.clients.read().await.contains_key(id) {
            return Err(PwaError::NotFound(format!("client {id}")));
        }
        self.send(HostCommand::PostMessage {
            client_id: id.to_string(),
            message: message.clone(),
        })
    }

    /// Forward a command to the host.
    pub fn send(&self, command: HostCommand) -> Result<()> {
        self.host_tx
            .send(command)
            .map_err(|_| PwaError::state("host command channel closed"))
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:06}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
