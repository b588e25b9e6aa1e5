use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::Event;
use super::router::Hub;
use super::types::{ClientId, OutboundMessage};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Receiving end of a client's mailbox, drained only by its outbound pump.
pub type Mailbox = async_channel::Receiver<OutboundMessage>;

/// One authenticated connection.
///
/// The room is only changed through the registry, under its lock, by the
/// client's own inbound pump.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    username: String,
    room: Mutex<Option<String>>,
    mailbox: async_channel::Sender<OutboundMessage>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl Client {
    /// Create a client with a bounded mailbox of `capacity` frames.
    pub fn new(username: impl Into<String>, capacity: usize) -> (Arc<Self>, Mailbox) {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        let client = Arc::new(Self {
            id: ClientId::generate(),
            username: username.into(),
            room: Mutex::new(None),
            mailbox: tx,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        (client, rx)
    }

    /// The identity peers see and address relays to.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Login name the connection's token was issued to. Not unique.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn room(&self) -> Option<String> {
        self.room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn in_room(&self, room: &str) -> bool {
        self.room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            == Some(room)
    }

    pub(crate) fn set_room(&self, room: String) {
        *self.room.lock().unwrap_or_else(PoisonError::into_inner) = Some(room);
    }

    pub(crate) async fn enqueue(
        &self,
        msg: OutboundMessage,
    ) -> Result<(), async_channel::SendError<OutboundMessage>> {
        self.mailbox.send(msg).await
    }

    /// Mark the client closed. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.mailbox.close();
        self.shutdown.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }
}

/// Register the client and run both pumps until the connection ends.
///
/// The outbound pump is spawned onto its own task; the inbound pump runs on
/// the caller's task. Either one hitting a terminal condition deregisters
/// the client, which wakes the other.
pub async fn serve<S>(hub: Arc<Hub>, client: Arc<Client>, mailbox: Mailbox, stream: WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    hub.register(client.clone());
    let (sink, stream) = stream.split();

    let writer = tokio::spawn(write_pump(hub.clone(), client.clone(), mailbox, sink));
    let by_reader = read_pump(&hub, &client, stream).await;

    let by_writer = match writer.await {
        Ok(removed) => removed,
        Err(e) => {
            warn!("Outbound pump for {} ended abnormally: {}", client.id(), e);
            false
        }
    };
    let side = match (by_reader, by_writer) {
        (true, _) => "inbound",
        (_, true) => "outbound",
        _ => "hub",
    };
    info!("Client {} ({}) disconnected, {} side", client.id(), client.username(), side);
}

/// Returns `true` if this pump was the one that deregistered the client.
async fn read_pump<S>(
    hub: &Hub,
    client: &Arc<Client>,
    mut stream: SplitStream<WebSocketStream<S>>,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = client.closed() => break,
            frame = stream.next() => frame,
        };

        let decoded = match frame {
            Some(Ok(Message::Text(text))) => Event::decode(text.as_bytes()),
            Some(Ok(Message::Binary(data))) => Event::decode(&data),
            Some(Ok(Message::Close(_))) => {
                debug!("Close received from {}", client.id());
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("WebSocket read error from {}: {}", client.id(), e);
                break;
            }
            None => break,
        };

        let event = match decoded {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping {}: {}", client.id(), e);
                break;
            }
        };

        if let Err(e) = hub.dispatch(event, client).await {
            warn!("Event from {} not handled: {}", client.id(), e);
        }
    }

    hub.deregister(client)
}

async fn write_pump<S>(
    hub: Arc<Hub>,
    client: Arc<Client>,
    mailbox: Mailbox,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ping_interval =
        tokio::time::interval_at(tokio::time::Instant::now() + PING_INTERVAL, PING_INTERVAL);

    loop {
        let frame = tokio::select! {
            biased;
            _ = client.closed() => break,
            msg = mailbox.recv() => match msg {
                Ok(msg) => Message::Text(msg.into_inner()),
                Err(_) => break,
            },
            _ = ping_interval.tick() => Message::Ping(Bytes::new()),
        };

        if let Err(e) = sink.send(frame).await {
            warn!("WebSocket write error to {}: {}", client.id(), e);
            break;
        }
    }

    let removed = hub.deregister(&client);
    if let Err(e) = sink.close().await {
        debug!("Close handshake with {} failed: {}", client.id(), e);
    }
    removed
}
