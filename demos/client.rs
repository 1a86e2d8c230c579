use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use clap_derive::Parser;
use tracing::{debug, info, warn, Level};

use ackudp::config::SessionConfig;
use ackudp::session::{ClientSession, InboundPacket, Session};
use ackudp::transport::UdpTransport;

/// Sends a random walk position to the server on every tick, and reports which of its packets the
///  server acknowledged
#[derive(Parser)]
struct Args {
    #[clap(default_value = "127.0.0.1:3000")]
    server_address: String,

    #[clap(long, default_value = "0.0.0.0:0")]
    bind_address: String,

    #[clap(long, default_value_t = 33)]
    tick_millis: u64,

    #[clap(long, default_value_t = 5)]
    timeout_secs: u64,

    /// start over with a new connection after the server timed out
    #[clap(long, default_value_t = false)]
    reconnect: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

struct RandomWalk {
    x: f32,
    y: f32,
    reconnect: bool,
}

impl RandomWalk {
    fn on_tick(&mut self, session: &mut ClientSession, inbound: Vec<InboundPacket>) -> anyhow::Result<()> {
        if !session.is_connected() {
            if self.reconnect {
                session.reconnect();
            }
            else {
                return Ok(());
            }
        }

        for mut p in inbound.into_iter().filter(|p| p.packet.unread_len() > 0) {
            let (Ok(x), Ok(y)) = (p.packet.pop_f32(), p.packet.pop_f32()) else {
                debug!(payload_len = p.packet.payload_len(), "echo does not contain a position - skipping");
                continue;
            };
            debug!(x, y, "received echo");
        }

        let peer = session.server_peer();
        let local_sequence = peer.local_sequence();
        if local_sequence > 0 && local_sequence % 30 == 0 {
            let num_acked = (local_sequence.saturating_sub(32)..=local_sequence)
                .filter(|&seq| seq > 0 && peer.is_acked_by_peer(seq))
                .count();
            info!(local_sequence, remote_sequence = peer.remote_sequence(), num_acked, "ack status");
        }

        self.x += rand::random::<f32>() - 0.5;
        self.y += rand::random::<f32>() - 0.5;

        let outbound = session.outbound();
        outbound.push_f32(self.x);
        outbound.push_f32(self.y);
        Ok(())
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let server_addr: SocketAddr = args.server_address.parse()?;
    let bind_addr: SocketAddr = args.bind_address.parse()?;

    let config = Arc::new(SessionConfig {
        tick_interval: Duration::from_millis(args.tick_millis),
        peer_timeout: Duration::from_secs(args.timeout_secs),
        ..SessionConfig::default()
    });

    let transport = Arc::new(UdpTransport::bind(bind_addr).await?);
    let mut session = Session::client(config, transport, server_addr)?;

    let mut walk = RandomWalk { x: 0.0, y: 0.0, reconnect: args.reconnect };
    let mut handler = |session: &mut ClientSession, inbound: Vec<InboundPacket>| walk.on_tick(session, inbound);
    session.run(&mut handler, async { tokio::signal::ctrl_c().await.ok(); }).await?;

    if !session.is_connected() {
        warn!("server timed out");
    }
    info!(stats = ?session.stats(), "client stopped");
    Ok(())
}
