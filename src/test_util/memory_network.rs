use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::trace;
use crate::transport::DatagramTransport;

/// convenience for test code: the same number always gives the same localhost address, different
///  numbers give different addresses
pub fn test_addr(number: u16) -> SocketAddr {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, number).into()
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SentDatagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub data: Vec<u8>,
    /// `false` if the datagram was lost, either because of the loss filter or because nobody
    ///  listens at the target address
    pub delivered: bool,
}

type LossFilter = Box<dyn FnMut(&SentDatagram) -> bool + Send>;

#[derive(Default)]
struct NetworkState {
    mailboxes: HashMap<SocketAddr, Mailbox>,
    loss_filter: Option<LossFilter>,
    sent: Vec<SentDatagram>,
}

struct Mailbox {
    pending: VecDeque<(SocketAddr, Vec<u8>)>,
    notify: Arc<Notify>,
}

/// An in-process datagram network. Endpoints created from the same network can exchange datagrams
///  by address, and every datagram sent through the network is recorded for later inspection.
///  Delivery is immediate and in order unless a loss filter decides otherwise.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> MemoryNetwork {
        Default::default()
    }

    pub fn endpoint(&self, addr: SocketAddr) -> Arc<MemoryTransport> {
        let notify = Arc::new(Notify::new());
        self.state.lock().unwrap()
            .mailboxes
            .insert(addr, Mailbox {
                pending: VecDeque::new(),
                notify: notify.clone(),
            });

        Arc::new(MemoryTransport {
            addr,
            state: self.state.clone(),
            notify,
        })
    }

    /// The filter is called for every datagram sent from now on - returning `true` drops it
    pub fn set_loss_filter(&self, filter: impl FnMut(&SentDatagram) -> bool + Send + 'static) {
        self.state.lock().unwrap()
            .loss_filter = Some(Box::new(filter));
    }

    /// sends a datagram from an arbitrary address, e.g. to simulate foreign traffic
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        self.state.lock().unwrap()
            .send(from, to, data);
    }

    pub fn sent_datagrams(&self) -> Vec<SentDatagram> {
        self.state.lock().unwrap()
            .sent
            .clone()
    }

    pub fn sent_datagrams_from(&self, from: SocketAddr) -> Vec<SentDatagram> {
        self.sent_datagrams()
            .into_iter()
            .filter(|d| d.from == from)
            .collect()
    }
}

impl NetworkState {
    fn send(&mut self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        let mut datagram = SentDatagram {
            from,
            to,
            data: data.to_vec(),
            delivered: false,
        };

        let lost = match &mut self.loss_filter {
            Some(filter) => filter(&datagram),
            None => false,
        };

        if !lost {
            if let Some(mailbox) = self.mailboxes.get_mut(&to) {
                mailbox.pending.push_back((from, datagram.data.clone()));
                mailbox.notify.notify_one();
                datagram.delivered = true;
            }
        }

        trace!(?from, ?to, len = data.len(), delivered = datagram.delivered, "memory network datagram");
        self.sent.push(datagram);
    }
}

pub struct MemoryTransport {
    addr: SocketAddr,
    state: Arc<Mutex<NetworkState>>,
    notify: Arc<Notify>,
}

impl MemoryTransport {
    fn has_pending(&self) -> bool {
        self.state.lock().unwrap()
            .mailboxes
            .get(&self.addr)
            .map(|m| !m.pending.is_empty())
            .unwrap_or(false)
    }
}

#[async_trait]
impl DatagramTransport for MemoryTransport {
    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn try_send_to(&self, buf: &[u8], to: SocketAddr) -> anyhow::Result<bool> {
        self.state.lock().unwrap()
            .send(self.addr, to, buf);
        Ok(true)
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> anyhow::Result<Option<(usize, SocketAddr)>> {
        let mut state = self.state.lock().unwrap();
        let Some((from, data)) = state.mailboxes
            .get_mut(&self.addr)
            .and_then(|m| m.pending.pop_front())
        else {
            return Ok(None);
        };

        // like a UDP socket, truncate datagrams that exceed the receive buffer
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(Some((len, from)))
    }

    async fn readable(&self) -> anyhow::Result<()> {
        loop {
            if self.has_pending() {
                return Ok(());
            }
            self.notify.notified().await;
        }
    }
}
