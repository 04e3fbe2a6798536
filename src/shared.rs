use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::endpoint::{Endpoint, Sink};
use crate::peer::Peer;
use crate::registry_client::RegistryClient;
use crate::rendezvous::RendezvousEngine;

/// Connection status as observed by a driver. Purely informational — no
/// transition in the peer runtime depends on reading it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Off,
    Connecting,
    On,
    Error,
}

/// State shared between the runtime's public operations and its background
/// tasks (the dispatcher and the keep-alive loop).
///
/// Per spec.md §5's shared-resource policy: the datagram socket is owned
/// exclusively by `endpoint`; the peer record is mutated only by
/// `join_network`, `leave_network`, and the keep-alive loop.
pub struct Shared {
    pub peer: AsyncMutex<Peer>,
    pub endpoint: AsyncMutex<Endpoint>,
    pub registry: RegistryClient,
    pub rendezvous: RendezvousEngine,
    pub status: SyncMutex<ConnectionStatus>,
    pub joined: std::sync::atomic::AtomicBool,
    pub sink: Sink,
}

impl Shared {
    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock() = status;
    }
}
