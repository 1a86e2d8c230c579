//! The session driver ties peers, transport and tick timing together.
//!
//! Per pass of the loop, a session ages its peers by the elapsed time, takes at most one datagram
//!  from the transport and then runs all ticks that are due. A tick hands the packets admitted
//!  since the previous tick to the application and afterwards sends one packet to every connected
//!  peer, carrying whatever payload the application put into that peer's outbound packet.
//!
//! [Session::run] does all of this in an async loop. The individual steps are public as well
//!  ([Session::age_peers], [Session::receive_one], [Session::tick], [Session::drain_inbound],
//!  [Session::send_all]) for applications that drive their own loop, and for deterministic tests.

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::time::sleep_until;
use tracing::{debug, info, trace, warn};
use crate::config::SessionConfig;
use crate::packet::Packet;
use crate::peer::{Admission, Peer};
use crate::peer_set::{PeerLookup, PeerSet, PeerTable, Rejection, SinglePeer};
use crate::stats::SessionStats;
use crate::timing::TickTimer;
use crate::transport::DatagramTransport;

/// An admitted packet, waiting for the application to process it. The packet's read cursor is at
///  the start of the payload.
#[derive(Clone, Debug)]
pub struct InboundPacket {
    pub from: SocketAddr,
    pub packet: Packet,
}

/// Application callback that is invoked once per tick with the packets admitted since the previous
///  tick, oldest first.
pub trait TickHandler<P: PeerSet> {
    fn on_tick(&mut self, session: &mut Session<P>, inbound: Vec<InboundPacket>) -> anyhow::Result<()>;
}

impl<P: PeerSet, F> TickHandler<P> for F
where F: FnMut(&mut Session<P>, Vec<InboundPacket>) -> anyhow::Result<()>
{
    fn on_tick(&mut self, session: &mut Session<P>, inbound: Vec<InboundPacket>) -> anyhow::Result<()> {
        self(session, inbound)
    }
}

pub type ClientSession = Session<SinglePeer>;
pub type ServerSession = Session<PeerTable>;

pub struct Session<P: PeerSet> {
    config: Arc<SessionConfig>,
    transport: Arc<dyn DatagramTransport>,
    peers: P,
    inbound: VecDeque<InboundPacket>,
    stats: SessionStats,
}

impl Session<SinglePeer> {
    /// A client session, talking to a single server. It starts out connected, i.e. it sends to
    ///  the server from the first tick on.
    pub fn client(config: Arc<SessionConfig>, transport: Arc<dyn DatagramTransport>, server_addr: SocketAddr) -> anyhow::Result<ClientSession> {
        config.validate()?;
        let peers = SinglePeer::new(&config, server_addr);
        Ok(Session::new(config, transport, peers))
    }

    /// the packet that is sent to the server on the next tick
    pub fn outbound(&mut self) -> &mut Packet {
        self.peers.peer_mut().outbound_mut()
    }

    pub fn server_peer(&self) -> &Peer {
        self.peers.peer()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.peers.server_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.peers.peer().is_connected()
    }

    /// A client that timed out stays disconnected until the application decides to reconnect.
    ///  Reconnecting starts with fresh sequence numbers.
    pub fn reconnect(&mut self) {
        info!(server_addr = ?self.peers.server_addr(), "reconnecting to server");
        self.peers.reconnect();
    }
}

impl Session<PeerTable> {
    /// A server session with `config.max_peers` connection slots. Peers are connected by the first
    ///  valid datagram they send.
    pub fn server(config: Arc<SessionConfig>, transport: Arc<dyn DatagramTransport>) -> anyhow::Result<ServerSession> {
        config.validate()?;
        let peers = PeerTable::new(&config);
        Ok(Session::new(config, transport, peers))
    }
}

impl<P: PeerSet> Session<P> {
    fn new(config: Arc<SessionConfig>, transport: Arc<dyn DatagramTransport>, peers: P) -> Session<P> {
        let inbound = VecDeque::with_capacity(config.inbound_queue_capacity);
        Session {
            config,
            transport,
            peers,
            inbound,
            stats: SessionStats::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn peers(&self) -> &P {
        &self.peers
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// the outbound packet for a connected peer, `None` if there is no connected peer at `addr`
    pub fn outbound_mut(&mut self, addr: SocketAddr) -> Option<&mut Packet> {
        self.peers.get_mut(addr)
            .map(|p| p.outbound_mut())
    }

    /// adds elapsed time to all connected peers' idle time, disconnecting those that time out
    pub fn age_peers(&mut self, elapsed: Duration) {
        for peer in self.peers.peers_mut() {
            if peer.age(elapsed) {
                info!(addr = ?peer.addr(), "peer timed out");
                self.stats.timeouts += 1;
            }
        }
    }

    /// Takes a single datagram from the transport if one is pending, and processes it. Returns
    ///  `false` if there was nothing to receive.
    pub fn receive_one(&mut self) -> anyhow::Result<bool> {
        let mut packet = Packet::new();
        let Some((len, from)) = self.transport.try_recv_from(packet.receive_buffer_mut())? else {
            return Ok(false);
        };
        packet.set_received_len(len);
        self.stats.datagrams_received += 1;

        if !packet.is_valid() {
            debug!(?from, len, "discarding malformed datagram");
            self.stats.malformed_discarded += 1;
            return Ok(true);
        }

        let peer = match self.peers.lookup(from) {
            PeerLookup::Existing(peer) => peer,
            PeerLookup::NewConnection(peer) => {
                info!(?from, "new peer connected");
                self.stats.connections += 1;
                peer
            }
            PeerLookup::Rejected(Rejection::TableFull) => {
                warn!(?from, "connection table is full - discarding datagram");
                self.stats.rejected_table_full += 1;
                return Ok(true);
            }
            PeerLookup::Rejected(reason) => {
                debug!(?from, ?reason, "discarding datagram from unexpected source");
                self.stats.rejected_foreign += 1;
                return Ok(true);
            }
        };

        match peer.admit(&packet)? {
            Admission::Admitted => {
                self.stats.packets_admitted += 1;
                if self.inbound.len() >= self.config.inbound_queue_capacity {
                    warn!(?from, "inbound queue is full - dropping oldest packet");
                    self.inbound.pop_front();
                    self.stats.inbound_overflow += 1;
                }
                self.inbound.push_back(InboundPacket { from, packet });
            }
            Admission::Stale => {
                self.stats.stale_discarded += 1;
            }
        }
        Ok(true)
    }

    /// all packets admitted since the previous call, oldest first
    pub fn drain_inbound(&mut self) -> Vec<InboundPacket> {
        self.inbound.drain(..).collect()
    }

    /// Stamps and sends the outbound packet of every connected peer, starting over with an empty
    ///  payload afterwards. A failed send affects only the peer it was addressed to: it is logged
    ///  and counted, and the remaining peers are served regardless.
    pub fn send_all(&mut self) -> anyhow::Result<()> {
        for peer in self.peers.peers_mut() {
            let Some(addr) = peer.addr() else { continue };
            if !peer.is_connected() {
                continue;
            }

            let packet = peer.stamp_outbound();
            let len = packet.len();
            trace!(?addr, ?packet, "sending packet");
            let result = self.transport.try_send_to(packet.as_bytes(), addr);
            peer.reset_outbound();

            match result {
                Ok(true) => {
                    self.stats.datagrams_sent += 1;
                    self.stats.bytes_sent += len as u64;
                }
                Ok(false) => {
                    self.stats.sends_dropped += 1;
                }
                Err(e) => {
                    warn!(?addr, "error sending packet: {}", e);
                    self.stats.send_errors += 1;
                }
            }
        }
        Ok(())
    }

    /// one fixed step: hand inbound packets to the application, then send to all connected peers
    pub fn tick(&mut self, handler: &mut impl TickHandler<P>) -> anyhow::Result<()> {
        let inbound = self.drain_inbound();
        handler.on_tick(self, inbound)?;
        self.send_all()
    }

    /// Runs the session loop until `shutdown` completes or the transport fails.
    pub async fn run(&mut self, handler: &mut impl TickHandler<P>, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let timer = TickTimer::new(self.config.tick_interval);
        self.run_with_timer(timer, handler, shutdown).await
    }

    /// Same as [Session::run], but with a timer created by the caller. The first tick is due one
    ///  tick interval after the timer was created, which allows several sessions to tick in step.
    pub async fn run_with_timer(&mut self, mut timer: TickTimer, handler: &mut impl TickHandler<P>, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let transport = self.transport.clone();
        tokio::pin!(shutdown);

        let local_addr = self.local_addr()?;
        info!(?local_addr, tick_interval = ?timer.tick_interval(), "starting session loop");

        loop {
            let elapsed = timer.advance();
            self.age_peers(elapsed);
            self.receive_one()?;

            while timer.try_consume_tick() {
                self.tick(handler)?;
            }

            select! {
                _ = &mut shutdown => {
                    info!("shutting down session loop");
                    return Ok(());
                }
                result = transport.readable() => result?,
                _ = sleep_until(timer.next_tick_deadline()) => {}
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use anyhow::anyhow;
    use tokio::time::sleep;
    use crate::packet::PacketHeader;
    use crate::peer_set::PeerSet;
    use crate::test_util::memory_network::{test_addr, MemoryNetwork};
    use crate::transport::MockDatagramTransport;
    use super::*;

    fn server_addr() -> SocketAddr {
        test_addr(3000)
    }

    fn client_addr() -> SocketAddr {
        test_addr(1000)
    }

    fn client(network: &MemoryNetwork, addr: SocketAddr, config: &SessionConfig) -> ClientSession {
        Session::client(Arc::new(config.clone()), network.endpoint(addr), server_addr()).unwrap()
    }

    fn server(network: &MemoryNetwork, config: &SessionConfig) -> ServerSession {
        Session::server(Arc::new(config.clone()), network.endpoint(server_addr())).unwrap()
    }

    fn datagram(sequence: u32) -> Vec<u8> {
        let mut packet = Packet::new();
        packet.write_header(&PacketHeader::new(sequence, 0, 0));
        packet.as_bytes().to_vec()
    }

    fn header(data: &[u8]) -> PacketHeader {
        Packet::from_received(data).header().unwrap()
    }

    /// one datagram each way: the client sends, the server receives and answers
    fn exchange(client: &mut ClientSession, server: &mut ServerSession) {
        client.send_all().unwrap();
        server.receive_one().unwrap();
        server.send_all().unwrap();
        client.receive_one().unwrap();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let network = MemoryNetwork::new();
        let config = Arc::new(SessionConfig {
            max_peers: 0,
            ..SessionConfig::default()
        });
        assert!(Session::server(config, network.endpoint(server_addr())).is_err());
    }

    #[test]
    fn test_three_ticks_end_to_end() {
        let network = MemoryNetwork::new();
        let config = SessionConfig::default();
        let mut client = client(&network, client_addr(), &config);
        let mut server = server(&network, &config);

        for _ in 0..3 {
            exchange(&mut client, &mut server);
        }

        let server_peer = server.peers().get(client_addr()).unwrap();
        assert_eq!(server_peer.remote_sequence(), 3);
        assert_eq!(server_peer.local_sequence(), 3);
        assert_eq!(client.server_peer().remote_sequence(), 3);

        client.send_all().unwrap();
        let sent = network.sent_datagrams_from(client_addr());
        assert_eq!(sent.len(), 4);
        assert_eq!(header(&sent[3].data), PacketHeader::new(4, 3, 0b11));

        // the server's most recent packet acknowledges the client's first three
        assert!(client.server_peer().is_acked_by_peer(3));
        assert!(client.server_peer().is_acked_by_peer(2));
        assert!(client.server_peer().is_acked_by_peer(1));
        assert!(!client.server_peer().is_acked_by_peer(4));

        assert_eq!(server.stats().connections, 1);
        assert_eq!(server.stats().packets_admitted, 3);
        assert_eq!(client.stats().datagrams_sent, 4);
        assert_eq!(client.stats().bytes_sent, 4 * PacketHeader::SERIALIZED_SIZE as u64);
    }

    #[test]
    fn test_payload_reaches_the_application() {
        let network = MemoryNetwork::new();
        let config = SessionConfig::default();
        let mut client = client(&network, client_addr(), &config);
        let mut server = server(&network, &config);

        client.outbound().push_u32(42);
        client.outbound().push_f32(3.5);
        client.send_all().unwrap();
        assert_eq!(client.outbound().payload_len(), 0);

        assert!(server.receive_one().unwrap());
        assert!(!server.receive_one().unwrap());

        let mut inbound = server.drain_inbound();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].from, client_addr());
        assert_eq!(inbound[0].packet.pop_u32().unwrap(), 42);
        assert_eq!(inbound[0].packet.pop_f32().unwrap(), 3.5);
        assert!(inbound[0].packet.pop_u32().is_err());
        assert!(server.drain_inbound().is_empty());

        server.outbound_mut(client_addr()).unwrap().push_i32(-7);
        assert!(server.outbound_mut(test_addr(1234)).is_none());
        server.send_all().unwrap();

        client.receive_one().unwrap();
        let mut inbound = client.drain_inbound();
        assert_eq!(inbound[0].from, server_addr());
        assert_eq!(inbound[0].packet.pop_i32().unwrap(), -7);
    }

    #[test]
    fn test_table_full() {
        let network = MemoryNetwork::new();
        let config = SessionConfig {
            max_peers: 1,
            ..SessionConfig::default()
        };
        let mut server = server(&network, &config);
        let mut client_1 = client(&network, test_addr(1001), &config);
        let mut client_2 = client(&network, test_addr(1002), &config);

        client_1.send_all().unwrap();
        client_2.send_all().unwrap();
        assert!(server.receive_one().unwrap());
        assert!(server.receive_one().unwrap());

        assert_eq!(server.peers().num_connected(), 1);
        assert!(server.peers().get(test_addr(1001)).is_some());
        assert!(server.peers().get(test_addr(1002)).is_none());
        assert_eq!(server.stats().connections, 1);
        assert_eq!(server.stats().rejected_table_full, 1);
        assert_eq!(server.drain_inbound().len(), 1);

        server.send_all().unwrap();
        let sent = network.sent_datagrams_from(server_addr());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, test_addr(1001));
    }

    #[test]
    fn test_discarded_datagrams() {
        let network = MemoryNetwork::new();
        let mut client = client(&network, client_addr(), &SessionConfig::default());

        network.inject(server_addr(), client_addr(), b"garbage that is long enough");
        network.inject(server_addr(), client_addr(), b"flag");
        network.inject(server_addr(), client_addr(), &[]);
        network.inject(test_addr(9), client_addr(), &datagram(1));
        network.inject(server_addr(), client_addr(), &datagram(2));
        network.inject(server_addr(), client_addr(), &datagram(2));
        network.inject(server_addr(), client_addr(), &datagram(1));

        while client.receive_one().unwrap() {}

        let stats = client.stats();
        assert_eq!(stats.datagrams_received, 7);
        assert_eq!(stats.malformed_discarded, 3);
        assert_eq!(stats.rejected_foreign, 1);
        assert_eq!(stats.packets_admitted, 1);
        assert_eq!(stats.stale_discarded, 2);
        assert_eq!(client.server_peer().remote_sequence(), 2);
        assert_eq!(client.drain_inbound().len(), 1);
    }

    #[test]
    fn test_timeout_and_reconnect() {
        let network = MemoryNetwork::new();
        let mut client = client(&network, client_addr(), &SessionConfig::default());

        network.inject(server_addr(), client_addr(), &datagram(1));
        client.receive_one().unwrap();
        client.send_all().unwrap();

        client.age_peers(Duration::from_millis(4999));
        assert!(client.is_connected());
        client.age_peers(Duration::from_millis(1));
        assert!(!client.is_connected());
        assert_eq!(client.stats().timeouts, 1);
        assert_eq!(client.server_peer().remote_sequence(), 0);
        assert_eq!(client.server_peer().local_sequence(), 0);
        assert!(client.server_peer().ack_history().is_empty());

        // a disconnected client neither sends nor receives
        client.send_all().unwrap();
        assert_eq!(network.sent_datagrams_from(client_addr()).len(), 1);
        network.inject(server_addr(), client_addr(), &datagram(2));
        client.receive_one().unwrap();
        assert_eq!(client.stats().rejected_foreign, 1);

        client.reconnect();
        assert!(client.is_connected());
        client.send_all().unwrap();
        let sent = network.sent_datagrams_from(client_addr());
        assert_eq!(header(&sent[1].data), PacketHeader::new(1, 0, 0));
    }

    #[test]
    fn test_server_frees_slot_on_timeout() {
        let network = MemoryNetwork::new();
        let config = SessionConfig {
            max_peers: 1,
            ..SessionConfig::default()
        };
        let mut server = server(&network, &config);

        network.inject(test_addr(1001), server_addr(), &datagram(1));
        server.receive_one().unwrap();
        server.age_peers(Duration::from_secs(5));
        assert_eq!(server.stats().timeouts, 1);
        assert_eq!(server.peers().num_connected(), 0);

        network.inject(test_addr(1002), server_addr(), &datagram(1));
        server.receive_one().unwrap();
        assert!(server.peers().get(test_addr(1002)).is_some());
        assert_eq!(server.stats().connections, 2);
    }

    #[test]
    fn test_inbound_overflow_drops_oldest() {
        let network = MemoryNetwork::new();
        let config = SessionConfig {
            inbound_queue_capacity: 2,
            ..SessionConfig::default()
        };
        let mut client = client(&network, client_addr(), &config);

        for seq in 1..=3 {
            network.inject(server_addr(), client_addr(), &datagram(seq));
        }
        while client.receive_one().unwrap() {}

        assert_eq!(client.stats().packets_admitted, 3);
        assert_eq!(client.stats().inbound_overflow, 1);
        let sequences = client.drain_inbound().iter()
            .map(|p| p.packet.header().unwrap().sequence)
            .collect::<Vec<_>>();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[test]
    fn test_lost_packet_is_missing_from_ack_bitfield() {
        let network = MemoryNetwork::new();
        let config = SessionConfig::default();
        let mut client = client(&network, client_addr(), &config);
        let mut server = server(&network, &config);

        network.set_loss_filter(move |d| d.from == client_addr() && header(&d.data).sequence == 2);

        for _ in 0..3 {
            exchange(&mut client, &mut server);
        }

        let server_peer = server.peers().get(client_addr()).unwrap();
        assert_eq!(server_peer.remote_sequence(), 3);
        assert_eq!(server_peer.ack_bitfield(), 0b10);

        assert_eq!(client.server_peer().received_ack(), (3, 0b10));
        assert!(client.server_peer().is_acked_by_peer(3));
        assert!(!client.server_peer().is_acked_by_peer(2));
        assert!(client.server_peer().is_acked_by_peer(1));
    }

    #[test]
    fn test_dropped_send_is_counted() {
        let mut transport = MockDatagramTransport::new();
        transport.expect_try_send_to()
            .returning(|_, _| Ok(false));
        let mut client = Session::client(Arc::new(SessionConfig::default()), Arc::new(transport), server_addr()).unwrap();

        client.outbound().push_u32(1);
        client.send_all().unwrap();

        assert_eq!(client.stats().sends_dropped, 1);
        assert_eq!(client.stats().datagrams_sent, 0);
        assert_eq!(client.server_peer().local_sequence(), 1);
        assert_eq!(client.outbound().payload_len(), 0);
    }

    #[test]
    fn test_receive_error_propagates() {
        let mut transport = MockDatagramTransport::new();
        transport.expect_try_recv_from()
            .returning(|_| Err(anyhow!("socket closed")));
        let mut client = Session::client(Arc::new(SessionConfig::default()), Arc::new(transport), server_addr()).unwrap();

        assert!(client.receive_one().is_err());
        assert_eq!(client.stats().datagrams_received, 0);
    }

    #[test]
    fn test_send_error_does_not_affect_other_peers() {
        let failing = test_addr(1001);
        let healthy = test_addr(1002);

        let mut transport = MockDatagramTransport::new();
        let mut senders = vec![healthy, failing];
        transport.expect_try_recv_from()
            .times(2)
            .returning(move |buf| {
                let data = datagram(1);
                buf[..data.len()].copy_from_slice(&data);
                Ok(senders.pop().map(|from| (data.len(), from)))
            });
        transport.expect_try_send_to()
            .withf(move |_, to| *to == failing)
            .times(1)
            .returning(|_, _| Err(anyhow!("invalid argument")));
        transport.expect_try_send_to()
            .withf(move |buf, to| *to == healthy && header(buf) == PacketHeader::new(1, 1, 0))
            .times(1)
            .returning(|_, _| Ok(true));

        let mut server = Session::server(Arc::new(SessionConfig::default()), Arc::new(transport)).unwrap();
        assert!(server.receive_one().unwrap());
        assert!(server.receive_one().unwrap());
        assert_eq!(server.peers().num_connected(), 2);

        server.send_all().unwrap();

        assert_eq!(server.stats().send_errors, 1);
        assert_eq!(server.stats().datagrams_sent, 1);
        assert_eq!(server.peers().get(healthy).unwrap().local_sequence(), 1);
        assert_eq!(server.peers().get(failing).unwrap().local_sequence(), 1);
        assert!(server.peers().get(failing).unwrap().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop() {
        let network = MemoryNetwork::new();
        let config = SessionConfig {
            tick_interval: Duration::from_millis(10),
            ..SessionConfig::default()
        };
        let mut client = client(&network, client_addr(), &config);
        let mut server = server(&network, &config);

        let server_received = Arc::new(Mutex::new(Vec::new()));
        let client_received = Arc::new(Mutex::new(Vec::new()));

        let mut counter = 0u32;
        let mut client_handler = {
            let client_received = client_received.clone();
            move |session: &mut ClientSession, inbound: Vec<InboundPacket>| -> anyhow::Result<()> {
                for mut p in inbound {
                    if p.packet.unread_len() > 0 {
                        client_received.lock().unwrap().push(p.packet.pop_u32()?);
                    }
                }
                counter += 1;
                session.outbound().push_u32(counter);
                Ok(())
            }
        };
        let mut server_handler = {
            let server_received = server_received.clone();
            move |session: &mut ServerSession, inbound: Vec<InboundPacket>| -> anyhow::Result<()> {
                for mut p in inbound {
                    let value = p.packet.pop_u32()?;
                    server_received.lock().unwrap().push(value);
                    if let Some(outbound) = session.outbound_mut(p.from) {
                        outbound.push_u32(value * 10);
                    }
                }
                Ok(())
            }
        };

        let (client_result, server_result) = tokio::join!(
            client.run(&mut client_handler, sleep(Duration::from_millis(105))),
            server.run(&mut server_handler, sleep(Duration::from_millis(105))),
        );
        client_result.unwrap();
        server_result.unwrap();

        let server_received = server_received.lock().unwrap().clone();
        assert!(server_received.len() >= 5, "{:?}", server_received);
        assert!(server_received.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(server_received[0], 1);

        let client_received = client_received.lock().unwrap().clone();
        assert!(!client_received.is_empty());
        assert!(client_received.iter().all(|v| v % 10 == 0));

        assert_eq!(server.peers().num_connected(), 1);
        assert_eq!(server.stats().malformed_discarded, 0);
    }
}
