//! Admission policies: which remote addresses a session talks to.
//!
//! A client talks to exactly one preconfigured server ([SinglePeer]), while a server keeps a
//!  fixed-size table of peer slots that are handed out to new addresses on demand
//!  ([PeerTable]). Everything else about a peer is the same on both sides.

use std::net::SocketAddr;
use tracing::debug;
use crate::config::SessionConfig;
use crate::peer::Peer;

/// The outcome of looking up the peer for an inbound datagram's source address
pub enum PeerLookup<'a> {
    Existing(&'a mut Peer),
    /// a previously free slot was connected to the address
    NewConnection(&'a mut Peer),
    Rejected(Rejection),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Rejection {
    /// the datagram's source is not the peer this session is bound to
    ForeignSource,
    /// the session's only peer timed out and was not reconnected
    Disconnected,
    /// all slots of the connection table are in use
    TableFull,
}

pub trait PeerSet {
    fn lookup(&mut self, addr: SocketAddr) -> PeerLookup<'_>;

    fn peers(&self) -> &[Peer];
    fn peers_mut(&mut self) -> &mut [Peer];

    fn get(&self, addr: SocketAddr) -> Option<&Peer> {
        self.peers().iter()
            .find(|p| p.is_connected_to(addr))
    }

    fn get_mut(&mut self, addr: SocketAddr) -> Option<&mut Peer> {
        self.peers_mut().iter_mut()
            .find(|p| p.is_connected_to(addr))
    }

    fn num_connected(&self) -> usize {
        self.peers().iter()
            .filter(|p| p.is_connected())
            .count()
    }
}

/// The client side: one peer for a preconfigured server address, connected from the start. There
///  is no handshake, the server learns about the client from its first packet.
pub struct SinglePeer {
    server_addr: SocketAddr,
    peer: Peer,
}

impl SinglePeer {
    pub fn new(config: &SessionConfig, server_addr: SocketAddr) -> SinglePeer {
        let mut peer = Peer::new(config);
        peer.connect(server_addr);

        SinglePeer {
            server_addr,
            peer,
        }
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn peer_mut(&mut self) -> &mut Peer {
        &mut self.peer
    }

    /// starts over with a fresh connection to the server, e.g. after a timeout
    pub fn reconnect(&mut self) {
        self.peer.connect(self.server_addr);
    }
}

impl PeerSet for SinglePeer {
    fn lookup(&mut self, addr: SocketAddr) -> PeerLookup<'_> {
        if addr != self.server_addr {
            return PeerLookup::Rejected(Rejection::ForeignSource);
        }
        if !self.peer.is_connected() {
            return PeerLookup::Rejected(Rejection::Disconnected);
        }
        PeerLookup::Existing(&mut self.peer)
    }

    fn peers(&self) -> &[Peer] {
        std::slice::from_ref(&self.peer)
    }

    fn peers_mut(&mut self) -> &mut [Peer] {
        std::slice::from_mut(&mut self.peer)
    }
}

/// The server side: a fixed number of peer slots, all disconnected initially. A datagram from an
///  unknown address takes the first free slot; slots become free again when their peer times out.
pub struct PeerTable {
    peers: Vec<Peer>,
}

impl PeerTable {
    pub fn new(config: &SessionConfig) -> PeerTable {
        PeerTable {
            peers: (0..config.max_peers)
                .map(|_| Peer::new(config))
                .collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.peers.len()
    }
}

impl PeerSet for PeerTable {
    fn lookup(&mut self, addr: SocketAddr) -> PeerLookup<'_> {
        if let Some(idx) = self.peers.iter().position(|p| p.is_connected_to(addr)) {
            return PeerLookup::Existing(&mut self.peers[idx]);
        }

        match self.peers.iter_mut().enumerate().find(|(_, p)| !p.is_connected()) {
            Some((slot, peer)) => {
                debug!(?addr, slot, "assigning free slot to new peer");
                peer.connect(addr);
                PeerLookup::NewConnection(peer)
            }
            None => PeerLookup::Rejected(Rejection::TableFull),
        }
    }

    fn peers(&self) -> &[Peer] {
        &self.peers
    }

    fn peers_mut(&mut self) -> &mut [Peer] {
        &mut self.peers
    }
}
