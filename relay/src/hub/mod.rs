//! The broadcast hub: the current-frame slot, the viewer registry and the
//! fan-out that pushes each frame to every viewer.
//!
//! Everything lives behind one mutex so that storing a frame and
//! broadcasting it happen as a single step. Writes to viewers are
//! non-blocking enqueues, so the lock is never held across network I/O.

pub mod channel;
pub mod registry;

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use frame_relay_common::frame::Frame;
use frame_relay_common::multipart::FrameChunks;
use tracing::{debug, info, trace};

use self::channel::ClientChannel;
use self::registry::{Client, ClientId, ClientRegistry};

struct HubState {
    fallback: Option<Frame>,
    current: Option<Frame>,
    clients: ClientRegistry,
    frames_accepted: u64,
    last_frame_ms: Option<i64>,
}

pub struct FrameHub {
    state: Mutex<HubState>,
}

/// Point-in-time counters for `/status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStats {
    pub clients: usize,
    pub frames_accepted: u64,
    /// Chunks written to the viewers connected right now.
    pub frames_delivered: u64,
    pub last_frame_ms: Option<i64>,
    pub has_live_frame: bool,
    pub has_fallback: bool,
}

impl HubState {
    // -- Frame store ------------------------------------------------------------

    /// The live frame, else the fallback, else nothing.
    fn current(&self) -> Option<Frame> {
        self.current.clone().or_else(|| self.fallback.clone())
    }

    fn set_current(&mut self, frame: Frame) {
        self.current = Some(frame);
        self.frames_accepted += 1;
        self.last_frame_ms = Some(Utc::now().timestamp_millis());
    }

    /// Forget the live frame so readers get the fallback.
    fn clear_current(&mut self) {
        self.current = None;
    }

    // -- Broadcast --------------------------------------------------------------

    /// Send `frame` to every writable viewer. Returns how many received it.
    fn broadcast(&mut self, frame: Option<&Frame>) -> usize {
        let Some(frame) = frame else {
            return 0;
        };
        if self.clients.is_empty() {
            return 0;
        }
        let chunks = FrameChunks::new(frame);
        let mut delivered = 0;
        self.clients.retain(|client| {
            if client.channel.is_closed() {
                debug!(client = %client.id, "pruning closed viewer");
                return false;
            }
            if deliver(client, &chunks) {
                delivered += 1;
            }
            true
        });
        debug!(bytes = frame.len(), delivered, "frame broadcast");
        delivered
    }

    /// Send `frame` to a single viewer.
    fn send_to(&mut self, frame: Option<&Frame>, id: ClientId) -> bool {
        let Some(frame) = frame else {
            return false;
        };
        match self.clients.get_mut(id) {
            Some(client) => deliver(client, &FrameChunks::new(frame)),
            None => false,
        }
    }
}

fn deliver(client: &mut Client, chunks: &FrameChunks) -> bool {
    if !client.channel.is_writable() {
        trace!(client = %client.id, "viewer busy, dropping frame");
        return false;
    }
    if !client.channel.write(chunks.for_client(client.frames_sent)) {
        return false;
    }
    client.frames_sent += 1;
    true
}

impl FrameHub {
    pub fn new(fallback: Option<Frame>) -> Self {
        Self {
            state: Mutex::new(HubState {
                fallback,
                current: None,
                clients: ClientRegistry::new(),
                frames_accepted: 0,
                last_frame_ms: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        // The frame slot is replaced whole, so a poisoned lock still guards
        // consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self) -> Option<Frame> {
        self.lock().current()
    }

    /// Register a viewer and immediately send it the current frame, if any.
    pub fn connect(&self, channel: Box<dyn ClientChannel>) -> ClientId {
        let mut state = self.lock();
        let id = state.clients.register(channel);
        let frame = state.current();
        state.send_to(frame.as_ref(), id);
        info!(client = %id, clients = state.clients.len(), "viewer connected");
        id
    }

    pub fn unregister(&self, id: ClientId) {
        let mut state = self.lock();
        if state.clients.unregister(id) {
            info!(client = %id, clients = state.clients.len(), "viewer disconnected");
        }
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Store `frame` as current and broadcast it, as one step.
    pub fn publish(&self, frame: Frame) -> usize {
        let mut state = self.lock();
        state.set_current(frame.clone());
        state.broadcast(Some(&frame))
    }

    /// Drop the live frame and push the fallback to every viewer.
    pub fn revert_to_fallback(&self) -> usize {
        let mut state = self.lock();
        state.clear_current();
        let fallback = state.fallback.clone();
        state.broadcast(fallback.as_ref())
    }

    pub fn stats(&self) -> HubStats {
        let state = self.lock();
        let mut frames_delivered = 0;
        state.clients.for_each(|c| frames_delivered += c.frames_sent);
        HubStats {
            clients: state.clients.len(),
            frames_accepted: state.frames_accepted,
            frames_delivered,
            last_frame_ms: state.last_frame_ms,
            has_live_frame: state.current.is_some(),
            has_fallback: state.fallback.is_some(),
        }
    }

    #[cfg(test)]
    pub fn frames_sent(&self, id: ClientId) -> Option<u64> {
        self.lock().clients.frames_sent(id)
    }

    #[cfg(test)]
    pub fn for_each_client(&self, f: impl FnMut(&Client)) {
        self.lock().clients.for_each(f);
    }
}
