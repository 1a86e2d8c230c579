//! Piggybacked acknowledgements.
//!
//! Every outgoing header carries `ack`, the highest sequence number received from the peer, and
//!  `ack_bitfield`, which covers the [ACK_WINDOW] sequence numbers immediately preceding `ack`:
//!  bit `n` is set if `ack - (n+1)` was received as well. So bit 0 stands for the packet one
//!  behind the ack, bit 31 for the packet 32 behind it. `ack` itself is never part of the
//!  bitfield.

use tracing::trace;
use crate::history_queue::HistoryQueue;

pub const ACK_WINDOW: u32 = u32::BITS;

/// Computes the bitfield for a peer's ack history, relative to the peer's `remote_sequence`.
///
/// The newest entry in the history is the packet that set `remote_sequence`, so it is skipped.
///  Entries that are further than [ACK_WINDOW] behind do not fit into the bitfield and are
///  ignored.
pub fn ack_bitfield(remote_sequence: u32, history: &HistoryQueue) -> u32 {
    let num_older = history.len().saturating_sub(1);

    history.iter()
        .take(num_older)
        .filter_map(|packet| packet.header().ok())
        .fold(0, |bitfield, header| {
            let distance = remote_sequence.wrapping_sub(header.sequence);
            if (1..=ACK_WINDOW).contains(&distance) {
                bitfield | (1 << (distance - 1))
            }
            else {
                trace!("sequence number {} is outside the ack window of {}", header.sequence, remote_sequence);
                bitfield
            }
        })
}

/// checks whether a received (`ack`, `ack_bitfield`) pair acknowledges a given sequence number
pub fn is_acked(ack: u32, ack_bitfield: u32, sequence: u32) -> bool {
    let distance = ack.wrapping_sub(sequence);
    match distance {
        0 => true,
        d if d <= ACK_WINDOW => ack_bitfield & (1 << (d - 1)) != 0,
        _ => false,
    }
}

/// all sequence numbers acknowledged by a received (`ack`, `ack_bitfield`) pair, newest first
pub fn acked_sequences(ack: u32, ack_bitfield: u32) -> impl Iterator<Item = u32> {
    std::iter::once(ack)
        .chain((0..ACK_WINDOW)
            .filter(move |bit| ack_bitfield & (1 << bit) != 0)
            .map(move |bit| ack.wrapping_sub(bit + 1))
        )
}
