use std::collections::HashMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::channel::ClientChannel;

/// Random draws attempted before falling back to probing for a free id.
const MAX_ID_DRAWS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

pub struct Client {
    pub id: ClientId,
    pub channel: Box<dyn ClientChannel>,
    /// Chunks delivered to this viewer. Never decreases.
    pub frames_sent: u64,
}

/// Connected viewers keyed by a random, collision-free id.
pub struct ClientRegistry {
    clients: HashMap<ClientId, Client>,
    rng: StdRng,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            clients: HashMap::new(),
            rng,
        }
    }

    /// Store `channel` under a fresh id with a zeroed frame counter.
    pub fn register(&mut self, channel: Box<dyn ClientChannel>) -> ClientId {
        let id = self.next_id();
        self.clients.insert(
            id,
            Client {
                id,
                channel,
                frames_sent: 0,
            },
        );
        id
    }

    /// Remove `id`. Removing an id that is not registered does nothing.
    pub fn unregister(&mut self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Client)) {
        self.clients.values().for_each(|c| f(c));
    }

    /// Drop every client for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&mut Client) -> bool) {
        self.clients.retain(|_, c| keep(c));
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    #[cfg(test)]
    pub fn frames_sent(&self, id: ClientId) -> Option<u64> {
        self.clients.get(&id).map(|c| c.frames_sent)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn next_id(&mut self) -> ClientId {
        for _ in 0..MAX_ID_DRAWS {
            let id = ClientId(self.rng.gen());
            if !self.clients.contains_key(&id) {
                return id;
            }
        }
        // Every draw collided; probe upward from a random start instead.
        let mut id = ClientId(self.rng.gen());
        while self.clients.contains_key(&id) {
            id = ClientId(id.0.wrapping_add(1));
        }
        id
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
