//! Sequence and acknowledgement tracking for real-time applications (typically games) that
//!  exchange unreliable datagrams at a fixed rate.
//!
//! Every packet starts with a 16 byte header:
//!
//! ```text
//! 0: magic number "flag" (u32 BE)
//! 4: sequence number (u32 BE)
//! 8: ack - the highest sequence number received from the peer (u32 BE)
//! 12: ack bitfield - bit n set means that `ack - (n+1)` was received as well (u32 BE)
//! ```
//!
//! followed by a payload of up to 1008 bytes of primitive values that the application pushes and
//!  pops positionally.
//!
//! A session sends one packet per peer and tick, so every packet acknowledges up to 33 packets
//!  received from the peer. That redundancy makes the acknowledgement information robust against
//!  packet loss, without the protocol ever waiting for anything.
//!
//! There are two kinds of sessions. A client talks to a single, preconfigured server. A server has
//!  a fixed number of peer slots that are taken by the first valid datagram from a new address;
//!  there is no handshake. Peers that stay silent for longer than a timeout are disconnected,
//!  freeing their slot.
//!
//! Out of scope: retransmission of lost payloads (the acknowledgements are the basis for an
//!  application doing that), congestion control, encryption or authentication, NAT traversal and
//!  fragmentation.

pub mod ack;
pub mod arena;
pub mod config;
pub mod history_queue;
pub mod packet;
pub mod peer;
pub mod peer_set;
pub mod session;
pub mod stats;
pub mod timing;
pub mod transport;
pub mod test_util;
