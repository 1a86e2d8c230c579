use anyhow::bail;
use tracing::trace;
use crate::arena::{Arena, SlotId};
use crate::packet::Packet;

struct Node {
    next: SlotId,
    prev: SlotId,
    /// `None` for the sentinel and for nodes on the free list
    packet: Option<Packet>,
}

/// A bounded FIFO of packets.
///
/// Nodes live in an [Arena] sized for `max_size + 1` nodes (the extra one being the sentinel),
///  and they form a circular doubly linked list through the sentinel: `sentinel.next` is the
///  oldest entry, `sentinel.prev` the newest. Popped nodes go to a free list and are reused
///  before the arena hands out fresh ones, so the arena never needs more than its initial
///  capacity.
///
/// The queue does not evict on its own - pushing to a full queue is an error, and callers that
///  want a sliding window pop the oldest entry first.
pub struct HistoryQueue {
    arena: Arena<Node>,
    sentinel: SlotId,
    free: Vec<SlotId>,
    size: usize,
    max_size: usize,
}

impl HistoryQueue {
    pub fn new(max_size: usize) -> HistoryQueue {
        let mut arena = Arena::with_capacity(max_size + 1);
        let sentinel = Self::init_sentinel(&mut arena);

        HistoryQueue {
            arena,
            sentinel,
            free: Vec::with_capacity(max_size),
            size: 0,
            max_size,
        }
    }

    fn init_sentinel(arena: &mut Arena<Node>) -> SlotId {
        assert_eq!(arena.used(), 0);

        // links are patched to point to the sentinel itself once its id is known
        let placeholder = Node {
            next: SlotId::from_raw(0),
            prev: SlotId::from_raw(0),
            packet: None,
        };
        let sentinel = arena.push(placeholder)
            .expect("this is a bug: the arena is always sized for at least the sentinel");

        let node = arena.get_mut(sentinel);
        node.next = sentinel;
        node.prev = sentinel;
        sentinel
    }

    pub fn push(&mut self, packet: Packet) -> anyhow::Result<()> {
        if self.is_full() {
            bail!("history queue is full ({} entries) - the oldest entry must be popped first", self.max_size);
        }

        let tail = self.arena.get(self.sentinel).prev;
        let node = Node {
            next: self.sentinel,
            prev: tail,
            packet: Some(packet),
        };

        let id = match self.free.pop() {
            Some(id) => {
                trace!("reusing node {} from free list", id);
                *self.arena.get_mut(id) = node;
                id
            }
            None => self.arena.push(node)?,
        };

        self.arena.get_mut(tail).next = id;
        self.arena.get_mut(self.sentinel).prev = id;
        self.size += 1;
        Ok(())
    }

    /// removes and returns the oldest entry
    pub fn pop(&mut self) -> Option<Packet> {
        let head = self.arena.get(self.sentinel).next;
        if head == self.sentinel {
            return None;
        }

        let node = self.arena.get_mut(head);
        let packet = node.packet.take();
        let next = node.next;
        let prev = node.prev;

        self.arena.get_mut(prev).next = next;
        self.arena.get_mut(next).prev = prev;

        self.free.push(head);
        self.size -= 1;
        packet
    }

    /// Drops all entries, reclaiming all nodes in one step. Node ids from before are invalid
    ///  after this, which is why free list and sentinel are rebuilt here as well.
    pub fn clear(&mut self) {
        self.arena.reset();
        self.free.clear();
        self.size = 0;
        self.sentinel = Self::init_sentinel(&mut self.arena);
    }

    pub fn is_full(&self) -> bool {
        self.size == self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn newest(&self) -> Option<&Packet> {
        let tail = self.arena.get(self.sentinel).prev;
        self.arena.get(tail).packet.as_ref()
    }

    /// iterates from the oldest to the newest entry
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            queue: self,
            current: self.arena.get(self.sentinel).next,
        }
    }
}

pub struct Iter<'a> {
    queue: &'a HistoryQueue,
    current: SlotId,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Packet;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == self.queue.sentinel {
            return None;
        }

        let node = self.queue.arena.get(self.current);
        self.current = node.next;
        node.packet.as_ref()
    }
}
