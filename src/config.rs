use std::time::Duration;
use anyhow::bail;
use crate::ack::ACK_WINDOW;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed duration of a simulation / network step. Each tick delivers the inbound packets
    ///  collected since the previous tick and sends one packet to every connected peer.
    pub tick_interval: Duration,

    /// A connected peer that has not sent a valid datagram for this long is disconnected
    pub peer_timeout: Duration,

    /// This is the number of most recently admitted packets per peer that are retained for
    ///  computing the ack bitfield. The newest of them is the ack itself, so a value of
    ///  `ACK_WINDOW + 1` is needed to fill all bits of the bitfield; smaller values shrink the
    ///  window that is acknowledged.
    pub ack_history_capacity: usize,

    /// Admitted packets are buffered until the application drains them on the next tick. If
    ///  this limit is exceeded between two ticks, the oldest buffered packets are dropped.
    pub inbound_queue_capacity: usize,

    /// number of slots in a server's connection table
    pub max_peers: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            tick_interval: Duration::from_millis(33),
            peer_timeout: Duration::from_secs(5),
            ack_history_capacity: 32,
            inbound_queue_capacity: 256,
            max_peers: 4,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval.is_zero() {
            bail!("tick interval must not be zero");
        }
        if self.peer_timeout <= self.tick_interval {
            bail!("peer timeout ({:?}) must be longer than the tick interval ({:?})", self.peer_timeout, self.tick_interval);
        }
        if self.ack_history_capacity == 0 {
            bail!("ack history capacity must be at least 1");
        }
        if self.ack_history_capacity > ACK_WINDOW as usize + 1 {
            bail!("ack history capacity of {} exceeds what the ack bitfield can represent ({})", self.ack_history_capacity, ACK_WINDOW + 1);
        }
        if self.inbound_queue_capacity == 0 {
            bail!("inbound queue capacity must be at least 1");
        }
        if self.max_peers == 0 {
            bail!("a server needs at least one peer slot");
        }
        Ok(())
    }
}
