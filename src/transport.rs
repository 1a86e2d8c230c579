use std::io::ErrorKind;
use std::net::SocketAddr;
use anyhow::bail;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// This trait decouples the session logic from the actual datagram socket. All operations except
///  for [DatagramTransport::readable] are non-blocking.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    fn local_addr(&self) -> anyhow::Result<SocketAddr>;

    /// Sends a single datagram. Returns `false` if the datagram was dropped because the socket
    ///  is not ready for writing - this is not an error for unreliable datagrams.
    fn try_send_to(&self, buf: &[u8], to: SocketAddr) -> anyhow::Result<bool>;

    /// Receives a single datagram if one is pending, returning its length and sender. `None` means
    ///  that nothing was pending, which is different from receiving a zero-length datagram.
    fn try_recv_from(&self, buf: &mut [u8]) -> anyhow::Result<Option<(usize, SocketAddr)>>;

    /// waits until a datagram may be available for receiving
    async fn readable(&self) -> anyhow::Result<()>;
}

/// Windows reports a datagram that exceeds the receive buffer as an error rather than silently
///  truncating it
const WSAEMSGSIZE: i32 = 10040;

/// Some receive errors refer to a single datagram or a single remote peer rather than to the
///  socket: ICMP 'port unreachable' for a peer that went away is reported as a connection reset
///  or refused, and Windows reports oversized datagrams as errors. Those are no reason to give up
///  on the socket.
fn is_datagram_specific(e: &std::io::Error) -> bool {
    match e.kind() {
        ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused => true,
        _ => cfg!(windows) && e.raw_os_error() == Some(WSAEMSGSIZE),
    }
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<UdpTransport> {
        let socket = UdpSocket::bind(addr).await?;
        debug!("bound UDP socket to {:?}", socket.local_addr()?);
        Ok(UdpTransport {
            socket,
        })
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn try_send_to(&self, buf: &[u8], to: SocketAddr) -> anyhow::Result<bool> {
        match self.socket.try_send_to(buf, to) {
            Ok(len) if len == buf.len() => Ok(true),
            Ok(len) => bail!("sent only {} of {} bytes to {:?}", len, buf.len(), to),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                warn!("socket is not ready for sending - dropping datagram to {:?}", to);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> anyhow::Result<Option<(usize, SocketAddr)>> {
        match self.socket.try_recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) if is_datagram_specific(&e) => {
                // the socket remains readable if there is more, so returning 'nothing' does not stall
                //  the receive loop
                debug!("discarding datagram: {}", e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn readable(&self) -> anyhow::Result<()> {
        Ok(self.socket.readable().await?)
    }
}
