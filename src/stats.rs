/// Running totals of what a session did with datagrams and peers. Discarded datagrams are not
///  errors, so these counters are the way to observe them.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SessionStats {
    /// datagrams taken from the transport, valid or not
    pub datagrams_received: u64,
    /// packets that passed validation and sequence checks and were handed to the application
    pub packets_admitted: u64,
    /// datagrams with a wrong magic number or too short for a header
    pub malformed_discarded: u64,
    /// valid packets with a sequence number that was not newer than the peer's remote sequence
    pub stale_discarded: u64,
    /// valid packets from an address this session does not talk to, including packets from the
    ///  server while a client is disconnected
    pub rejected_foreign: u64,
    /// valid packets from new addresses that arrived while the connection table was full
    pub rejected_table_full: u64,
    /// admitted packets dropped because the application did not drain them in time
    pub inbound_overflow: u64,

    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    /// datagrams dropped because the socket was not ready for writing
    pub sends_dropped: u64,
    /// sends that failed for a single destination, e.g. because of an invalid peer address
    pub send_errors: u64,

    /// peers that were connected by an inbound datagram, i.e. new connections on a server
    pub connections: u64,
    pub timeouts: u64,
}
