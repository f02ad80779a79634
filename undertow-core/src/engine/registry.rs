//! Connected peers and their local choke state, owned by the swarm actor.

use std::collections::HashMap;
use std::net::SocketAddr;

use rand::seq::IteratorRandom;
use tokio::sync::mpsc;

use crate::torrent::PeerMessage;
use crate::torrent::protocol::ConnectionDirection;

/// One registered connection.
#[derive(Debug)]
pub struct PeerEntry {
    pub direction: ConnectionDirection,
    /// True while we refuse to serve this peer's requests
    pub local_choking: bool,
    outbound: mpsc::UnboundedSender<PeerMessage>,
}

impl PeerEntry {
    /// Queues a message on the connection's writer.
    ///
    /// Returns false if the connection is already gone; the writer retries
    /// transient socket errors on its own.
    pub fn send(&self, message: PeerMessage) -> bool {
        self.outbound.send(message).is_ok()
    }
}

/// Registry of connected peers keyed by address.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<SocketAddr, PeerEntry>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection; it starts unchoked since the worker offers to upload.
    pub fn register(
        &mut self,
        address: SocketAddr,
        direction: ConnectionDirection,
        outbound: mpsc::UnboundedSender<PeerMessage>,
    ) {
        let previous = self.peers.insert(
            address,
            PeerEntry {
                direction,
                local_choking: false,
                outbound,
            },
        );
        if previous.is_some() {
            tracing::debug!(peer = %address, "Replaced existing registry entry");
        }
    }

    pub fn remove(&mut self, address: SocketAddr) -> Option<PeerEntry> {
        self.peers.remove(&address)
    }

    pub fn get(&self, address: SocketAddr) -> Option<&PeerEntry> {
        self.peers.get(&address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.peers.keys().copied()
    }

    /// Sends a message to every peer, best-effort.
    ///
    /// Returns how many connections accepted it.
    pub fn broadcast(&self, message: &PeerMessage) -> usize {
        self.peers
            .values()
            .filter(|entry| entry.send(message.clone()))
            .count()
    }

    /// Chokes a peer and tells it so. Returns false for unknown peers.
    pub fn choke(&mut self, address: SocketAddr) -> bool {
        let Some(entry) = self.peers.get_mut(&address) else {
            return false;
        };
        if !entry.local_choking {
            entry.local_choking = true;
            entry.send(PeerMessage::Choke);
        }
        true
    }

    /// Unchokes a peer and tells it so. Returns false for unknown peers.
    pub fn unchoke(&mut self, address: SocketAddr) -> bool {
        let Some(entry) = self.peers.get_mut(&address) else {
            return false;
        };
        if entry.local_choking {
            entry.local_choking = false;
            entry.send(PeerMessage::Unchoke);
        }
        true
    }

    /// Picks one registered peer uniformly at random and unchokes it if choked.
    ///
    /// Previously unchoked peers are never re-choked here. Returns the peer
    /// that was unchoked, if any.
    pub fn optimistic_unchoke(&mut self) -> Option<SocketAddr> {
        let address = self.peers.keys().copied().choose(&mut rand::rng())?;
        let entry = self.peers.get(&address)?;
        if !entry.local_choking {
            return None;
        }
        self.unchoke(address);
        Some(address)
    }
}
