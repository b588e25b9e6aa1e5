use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::client::Client;
use super::types::ClientId;

/// The set of live clients.
///
/// Every operation takes the lock for the duration of a map update or copy
/// and releases it before returning, so callers never hold it across I/O
/// and every snapshot sees each add/remove either fully or not at all.
#[derive(Debug, Default)]
pub struct Registry {
    clients: Mutex<HashMap<ClientId, Arc<Client>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, Arc<Client>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, client: Arc<Client>) {
        self.lock().insert(client.id(), client);
    }

    /// Remove a client, returning it only if it was still registered.
    pub fn deregister(&self, id: ClientId) -> Option<Arc<Client>> {
        self.lock().remove(&id)
    }

    pub fn snapshot(&self) -> Vec<Arc<Client>> {
        self.lock().values().cloned().collect()
    }

    pub fn members_of(&self, room: &str) -> Vec<Arc<Client>> {
        self.lock()
            .values()
            .filter(|c| c.in_room(room))
            .cloned()
            .collect()
    }

    /// Move `client` into `room` and return the room's membership as of
    /// that move, joiner included.
    pub fn move_to_room(&self, client: &Client, room: &str) -> Vec<Arc<Client>> {
        let clients = self.lock();
        client.set_room(room.to_string());
        clients
            .values()
            .filter(|c| c.in_room(room))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
