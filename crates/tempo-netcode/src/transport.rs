//! Transport traits and an in-process transport
//!
//! The netcode never touches sockets. A host (server) and its clients talk
//! through these traits; reliability and ordering belong to the
//! implementation. Every call is non-blocking: `poll` returns `None` once the
//! queue is empty.
//!
//! [`MemoryHost`] / [`MemoryClient`] implement the traits over crossbeam
//! channels, which is how a local match runs the server on a background
//! thread with the transport as the only shared state.

use crate::{Channel, ConnectionId, Error, Packet, Result};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use indexmap::IndexMap;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// Something that happened on the host side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
    Received { from: ConnectionId, bytes: Vec<u8> },
}

/// Something that happened on the client side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected(ConnectionId),
    Disconnected,
    Received(Vec<u8>),
}

/// Server end of a transport
pub trait HostTransport: Send {
    /// Take the next pending event, if any
    fn poll(&mut self) -> Option<HostEvent>;

    /// Send a datagram to one peer
    fn send(&mut self, to: ConnectionId, channel: Channel, bytes: &[u8]) -> Result<()>;

    /// Drop a peer
    fn disconnect(&mut self, peer: ConnectionId);

    /// Currently connected peers
    fn peers(&self) -> Vec<ConnectionId>;

    /// Encode and send a packet on its fixed channel
    fn send_packet(&mut self, to: ConnectionId, packet: &Packet) -> Result<()> {
        let bytes = packet.encode()?;
        self.send(to, packet.channel(), &bytes)
    }

    /// Encode once and send to every peer
    fn broadcast_packet(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.encode()?;
        for peer in self.peers() {
            self.send(peer, packet.channel(), &bytes)?;
        }
        Ok(())
    }
}

/// Client end of a transport
pub trait ClientTransport: Send {
    /// Take the next pending event, if any
    fn poll(&mut self) -> Option<ClientEvent>;

    /// Send a datagram to the host
    fn send(&mut self, channel: Channel, bytes: &[u8]) -> Result<()>;

    /// Check if the link to the host is up
    fn is_connected(&self) -> bool;

    /// Close the link
    fn disconnect(&mut self);

    /// Encode and send a packet on its fixed channel
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.encode()?;
        self.send(packet.channel(), &bytes)
    }
}

#[derive(Debug)]
enum ToHost {
    Datagram(Vec<u8>),
    Close,
}

#[derive(Debug)]
enum ToClient {
    Accepted(ConnectionId),
    Datagram(Vec<u8>),
    Close,
}

struct PendingPeer {
    tx: Sender<ToClient>,
    rx: Receiver<ToHost>,
}

struct Peer {
    tx: Sender<ToClient>,
    rx: Receiver<ToHost>,
}

/// Host end of the in-process transport
pub struct MemoryHost {
    joins: Receiver<PendingPeer>,
    peers: IndexMap<ConnectionId, Peer>,
    events: VecDeque<HostEvent>,
    next_id: u8,
}

/// Hands out clients connected to a [`MemoryHost`]; cheap to clone
#[derive(Clone)]
pub struct MemoryConnector {
    joins: Sender<PendingPeer>,
}

/// Client end of the in-process transport
pub struct MemoryClient {
    tx: Sender<ToHost>,
    rx: Receiver<ToClient>,
    connected: bool,
    closed: bool,
}

impl MemoryHost {
    /// Create a host and the connector clients join through
    pub fn new() -> (Self, MemoryConnector) {
        let (tx, rx) = unbounded();
        let host = Self {
            joins: rx,
            peers: IndexMap::new(),
            events: VecDeque::new(),
            next_id: 0,
        };
        (host, MemoryConnector { joins: tx })
    }

    /// Next id not held by a live peer
    fn allocate_id(&mut self) -> Option<ConnectionId> {
        let id = (0..=u8::MAX)
            .map(|offset| self.next_id.wrapping_add(offset))
            .find(|raw| !self.peers.contains_key(&ConnectionId(*raw)))?;
        self.next_id = id.wrapping_add(1);
        Some(ConnectionId(id))
    }

    fn accept_joins(&mut self) {
        while let Ok(pending) = self.joins.try_recv() {
            let Some(id) = self.allocate_id() else {
                warn!(peers = self.peers.len(), "memory transport out of connection ids, refusing join");
                let _ = pending.tx.send(ToClient::Close);
                continue;
            };
            if pending.tx.send(ToClient::Accepted(id)).is_err() {
                continue;
            }
            debug!(peer = %id, "memory transport peer joined");
            self.peers.insert(
                id,
                Peer {
                    tx: pending.tx,
                    rx: pending.rx,
                },
            );
            self.events.push_back(HostEvent::Connected(id));
        }
    }

    fn drain_peers(&mut self) {
        let mut gone = Vec::new();
        for (id, peer) in &self.peers {
            loop {
                match peer.rx.try_recv() {
                    Ok(ToHost::Datagram(bytes)) => {
                        trace!(peer = %id, len = bytes.len(), "datagram in");
                        self.events.push_back(HostEvent::Received { from: *id, bytes });
                    }
                    Ok(ToHost::Close) | Err(TryRecvError::Disconnected) => {
                        gone.push(*id);
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }
        }
        for id in gone {
            self.peers.shift_remove(&id);
            self.events.push_back(HostEvent::Disconnected(id));
        }
    }
}

impl HostTransport for MemoryHost {
    fn poll(&mut self) -> Option<HostEvent> {
        if self.events.is_empty() {
            // Departures first, so their ids are free for this round's joins
            self.drain_peers();
            self.accept_joins();
        }
        self.events.pop_front()
    }

    fn send(&mut self, to: ConnectionId, _channel: Channel, bytes: &[u8]) -> Result<()> {
        let peer = self.peers.get(&to).ok_or(Error::Disconnected)?;
        peer.tx
            .send(ToClient::Datagram(bytes.to_vec()))
            .map_err(|_| Error::Disconnected)
    }

    fn disconnect(&mut self, peer: ConnectionId) {
        if let Some(p) = self.peers.shift_remove(&peer) {
            let _ = p.tx.send(ToClient::Close);
            self.events.push_back(HostEvent::Disconnected(peer));
        }
    }

    fn peers(&self) -> Vec<ConnectionId> {
        self.peers.keys().copied().collect()
    }
}

impl MemoryConnector {
    /// Open a new client link; the host sees it on its next poll
    pub fn connect(&self) -> Result<MemoryClient> {
        let (to_host_tx, to_host_rx) = unbounded();
        let (to_client_tx, to_client_rx) = unbounded();
        self.joins
            .send(PendingPeer {
                tx: to_client_tx,
                rx: to_host_rx,
            })
            .map_err(|_| Error::Transport("host is gone".to_string()))?;
        Ok(MemoryClient {
            tx: to_host_tx,
            rx: to_client_rx,
            connected: false,
            closed: false,
        })
    }
}

impl ClientTransport for MemoryClient {
    fn poll(&mut self) -> Option<ClientEvent> {
        if self.closed {
            return None;
        }
        match self.rx.try_recv() {
            Ok(ToClient::Accepted(id)) => {
                self.connected = true;
                Some(ClientEvent::Connected(id))
            }
            Ok(ToClient::Datagram(bytes)) => Some(ClientEvent::Received(bytes)),
            Ok(ToClient::Close) | Err(TryRecvError::Disconnected) => {
                self.connected = false;
                self.closed = true;
                Some(ClientEvent::Disconnected)
            }
            Err(TryRecvError::Empty) => None,
        }
    }

    fn send(&mut self, _channel: Channel, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Disconnected);
        }
        self.tx
            .send(ToHost::Datagram(bytes.to_vec()))
            .map_err(|_| Error::Disconnected)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        if !self.closed {
            let _ = self.tx.send(ToHost::Close);
            self.connected = false;
            self.closed = true;
        }
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
