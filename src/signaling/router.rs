use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, join_all};
use tracing::{debug, info, warn};

use super::client::Client;
use super::handlers;
use super::messages::{self, Event};
use super::registry::Registry;
use super::types::{OutboundMessage, SignalingError};

/// Default bounded wait for a single recipient's mailbox.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) type Handler =
    for<'a> fn(&'a Hub, &'a Arc<Client>, Event) -> BoxFuture<'a, Result<(), SignalingError>>;

/// Connection registry plus the event router that works over it.
pub struct Hub {
    registry: Registry,
    handlers: HashMap<&'static str, Handler>,
    send_timeout: Duration,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

impl Hub {
    pub fn new(send_timeout: Duration) -> Self {
        let mut table: HashMap<&'static str, Handler> = HashMap::new();
        table.insert(messages::SEND_MESSAGE, handlers::send_message);
        table.insert(messages::CHANGE_ROOM, handlers::change_room);
        table.insert(messages::JOIN_ROOM, handlers::join_room);
        table.insert(messages::OFFER, handlers::relay);
        table.insert(messages::ANSWER, handlers::relay);
        table.insert(messages::ICE_CANDIDATE, handlers::relay);

        Self {
            registry: Registry::new(),
            handlers: table,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn register(&self, client: Arc<Client>) {
        info!("Client {} ({}) registered", client.id(), client.username());
        self.registry.register(client);
    }

    /// Remove the client and close it. Returns `false` if it was already gone.
    pub fn deregister(&self, client: &Client) -> bool {
        match self.registry.deregister(client.id()) {
            Some(removed) => {
                removed.close();
                info!("Client {} ({}) deregistered", removed.id(), removed.username());
                true
            }
            None => false,
        }
    }

    /// Deregister every client, closing each one. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        self.registry
            .snapshot()
            .iter()
            .filter(|client| self.deregister(client))
            .count()
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Route an inbound event to its handler.
    pub async fn dispatch(&self, event: Event, client: &Arc<Client>) -> Result<(), SignalingError> {
        let handler = self
            .handlers
            .get(event.kind())
            .ok_or_else(|| SignalingError::UnknownEvent(event.kind().to_string()))?;
        handler(self, client, event).await
    }

    /// Enqueue `msg` on one recipient, giving up after the send timeout.
    pub(crate) async fn deliver_to(&self, recipient: &Client, msg: OutboundMessage) -> bool {
        match tokio::time::timeout(self.send_timeout, recipient.enqueue(msg)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                debug!("Mailbox of {} is closed, dropping event", recipient.id());
                false
            }
            Err(_) => {
                warn!(
                    "Timed out after {:?} enqueueing for {}, dropping event",
                    self.send_timeout,
                    recipient.id()
                );
                false
            }
        }
    }

    /// Enqueue `msg` on every recipient concurrently. Returns how many took it.
    pub(crate) async fn deliver(&self, recipients: &[Arc<Client>], msg: &OutboundMessage) -> usize {
        join_all(recipients.iter().map(|c| self.deliver_to(c, msg.clone())))
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }
}
