use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, trace};
use crate::ack::{ack_bitfield, is_acked};
use crate::config::SessionConfig;
use crate::history_queue::HistoryQueue;
use crate::packet::{Packet, PacketHeader};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PeerState {
    Disconnected,
    Connected,
}

/// The result of offering a valid inbound packet to a [Peer]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Admission {
    /// the packet is newer than anything received before
    Admitted,
    /// the packet's sequence number is not greater than the peer's `remote_sequence`: it is either
    ///  a duplicate or it arrived out of order after a newer one
    Stale,
}

/// Everything that is tracked per remote endpoint.
///
/// A peer is `Connected` while it keeps sending valid datagrams. If it stays silent for longer than
///  the configured timeout, it falls back to `Disconnected`, which resets all per-connection state
///  so that the peer can be reused for a new connection.
pub struct Peer {
    addr: Option<SocketAddr>,
    state: PeerState,
    peer_timeout: Duration,
    idle_time: Duration,

    /// sequence number of the most recent packet sent to this peer
    local_sequence: u32,
    /// highest sequence number received from this peer
    remote_sequence: u32,

    /// ack information from the most recent packet admitted from this peer, i.e. which of our
    ///  packets the peer has confirmed
    received_ack: u32,
    received_ack_bitfield: u32,

    outbound: Packet,
    ack_history: HistoryQueue,
}

impl Debug for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Peer{{addr:{:?}, state:{:?}, local:{}, remote:{}}}", self.addr, self.state, self.local_sequence, self.remote_sequence)
    }
}

impl Peer {
    /// creates a peer in `Disconnected` state
    pub fn new(config: &SessionConfig) -> Peer {
        Peer {
            addr: None,
            state: PeerState::Disconnected,
            peer_timeout: config.peer_timeout,
            idle_time: Duration::ZERO,
            local_sequence: 0,
            remote_sequence: 0,
            received_ack: 0,
            received_ack_bitfield: 0,
            outbound: Packet::new(),
            ack_history: HistoryQueue::new(config.ack_history_capacity),
        }
    }

    pub fn connect(&mut self, addr: SocketAddr) {
        debug!(?addr, "connecting peer");
        self.reset();
        self.addr = Some(addr);
        self.state = PeerState::Connected;
    }

    /// Returns to `Disconnected` state, dropping all per-connection state. The address is kept
    ///  for diagnostics.
    pub fn disconnect(&mut self) {
        debug!(addr = ?self.addr, "disconnecting peer");
        self.reset();
        self.state = PeerState::Disconnected;
    }

    fn reset(&mut self) {
        self.idle_time = Duration::ZERO;
        self.local_sequence = 0;
        self.remote_sequence = 0;
        self.received_ack = 0;
        self.received_ack_bitfield = 0;
        self.outbound.init();
        self.ack_history.clear();
    }

    /// Accumulates idle time for a connected peer, disconnecting it when the timeout is reached.
    ///  Returns `true` if this call timed the peer out.
    pub fn age(&mut self, elapsed: Duration) -> bool {
        if !self.is_connected() {
            return false;
        }

        self.idle_time += elapsed;
        if self.idle_time >= self.peer_timeout {
            self.disconnect();
            return true;
        }
        false
    }

    /// Processes a valid packet received from this peer. Any valid packet shows that the peer is
    ///  alive, but only packets with a sequence number greater than all previous ones are
    ///  admitted into the ack history.
    pub fn admit(&mut self, packet: &Packet) -> anyhow::Result<Admission> {
        let header = packet.header()?;
        self.idle_time = Duration::ZERO;

        if header.sequence <= self.remote_sequence {
            trace!(addr = ?self.addr, sequence = header.sequence, remote_sequence = self.remote_sequence, "discarding stale packet");
            return Ok(Admission::Stale);
        }

        self.remote_sequence = header.sequence;
        self.received_ack = header.ack;
        self.received_ack_bitfield = header.ack_bitfield;

        if self.ack_history.is_full() {
            self.ack_history.pop();
        }
        self.ack_history.push(packet.clone())?;
        Ok(Admission::Admitted)
    }

    pub fn ack_bitfield(&self) -> u32 {
        ack_bitfield(self.remote_sequence, &self.ack_history)
    }

    /// Writes the header for the next outbound packet, assigning it a new local sequence number,
    ///  and returns the packet ready for sending. [Peer::reset_outbound] must be called after
    ///  sending.
    pub fn stamp_outbound(&mut self) -> &Packet {
        self.local_sequence = self.local_sequence.wrapping_add(1);
        let header = PacketHeader::new(self.local_sequence, self.remote_sequence, self.ack_bitfield());
        self.outbound.write_header(&header);
        &self.outbound
    }

    pub fn reset_outbound(&mut self) {
        self.outbound.init();
    }

    /// the packet being assembled for the next send; the application writes its payload here
    pub fn outbound_mut(&mut self) -> &mut Packet {
        &mut self.outbound
    }

    /// whether the peer acknowledged one of our packets, based on the most recent packet
    ///  admitted from it
    pub fn is_acked_by_peer(&self, local_sequence: u32) -> bool {
        self.received_ack != 0 && is_acked(self.received_ack, self.received_ack_bitfield, local_sequence)
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == PeerState::Connected
    }

    pub fn is_connected_to(&self, addr: SocketAddr) -> bool {
        self.is_connected() && self.addr == Some(addr)
    }

    pub fn idle_time(&self) -> Duration {
        self.idle_time
    }

    pub fn local_sequence(&self) -> u32 {
        self.local_sequence
    }

    pub fn remote_sequence(&self) -> u32 {
        self.remote_sequence
    }

    pub fn received_ack(&self) -> (u32, u32) {
        (self.received_ack, self.received_ack_bitfield)
    }

    pub fn ack_history(&self) -> &HistoryQueue {
        &self.ack_history
    }
}
