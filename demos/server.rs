use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use clap_derive::Parser;
use tracing::{debug, info, Level};

use ackudp::config::SessionConfig;
use ackudp::peer_set::PeerSet;
use ackudp::session::{InboundPacket, ServerSession, Session};
use ackudp::transport::UdpTransport;

/// Accepts up to `max-peers` clients and echoes each client's most recent position back to it,
///  scaled by a factor
#[derive(Parser)]
struct Args {
    #[clap(short, long, default_value_t = 3000)]
    port: u16,

    #[clap(long, default_value_t = 33)]
    tick_millis: u64,

    #[clap(long, default_value_t = 5)]
    timeout_secs: u64,

    #[clap(long, default_value_t = 4)]
    max_peers: usize,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

fn on_tick(session: &mut ServerSession, inbound: Vec<InboundPacket>) -> anyhow::Result<()> {
    for mut p in inbound {
        let seq = p.packet.header()?.sequence;
        let (Ok(x), Ok(y)) = (p.packet.pop_f32(), p.packet.pop_f32()) else {
            debug!(from = ?p.from, seq, payload_len = p.packet.payload_len(), "packet does not contain a position - skipping");
            continue;
        };
        info!(from = ?p.from, seq, x, y, "received position");

        if let Some(outbound) = session.outbound_mut(p.from) {
            outbound.push_f32(2.0 * x);
            outbound.push_f32(2.0 * y);
        }
    }
    Ok(())
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

    let config = Arc::new(SessionConfig {
        tick_interval: Duration::from_millis(args.tick_millis),
        peer_timeout: Duration::from_secs(args.timeout_secs),
        max_peers: args.max_peers,
        ..SessionConfig::default()
    });

    let addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, args.port).into();
    let transport = Arc::new(UdpTransport::bind(addr).await?);
    let mut session = Session::server(config, transport)?;

    let mut handler = on_tick;
    session.run(&mut handler, async { tokio::signal::ctrl_c().await.ok(); }).await?;

    info!(stats = ?session.stats(), connected = session.peers().num_connected(), "server stopped");
    Ok(())
}
