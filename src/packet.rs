//! Fixed-size packets and their wire format.
//!
//! A packet is a pre-allocated buffer of [MAX_PACKET_SIZE] bytes with a [PacketHeader] at the
//!  start, followed by a payload of primitive values. The payload is positional: the receiver
//!  must pop values in the same order and with the same types they were pushed. Nothing about
//!  the types is stored on the wire.
//!
//! All numbers are in network byte order (BE).

use std::fmt::{Debug, Formatter};
use std::mem::size_of;
use anyhow::bail;
use bytes::buf::UninitSlice;
use bytes::{Buf, BufMut};

pub const MAX_PACKET_SIZE: usize = 1024;

/// "flag" - identifies datagrams belonging to this protocol
pub const PROTOCOL_MAGIC: u32 = u32::from_be_bytes(*b"flag");

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PacketHeader {
    pub magic: u32,
    pub sequence: u32,
    /// the highest sequence number the sender has received from its peer
    pub ack: u32,
    /// bit `n` set means that `ack - (n+1)` was received as well
    pub ack_bitfield: u32,
}
impl PacketHeader {
    pub const SERIALIZED_SIZE: usize = 4 * size_of::<u32>();

    pub fn new(sequence: u32, ack: u32, ack_bitfield: u32) -> PacketHeader {
        PacketHeader {
            magic: PROTOCOL_MAGIC,
            sequence,
            ack,
            ack_bitfield,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.magic);
        buf.put_u32(self.sequence);
        buf.put_u32(self.ack);
        buf.put_u32(self.ack_bitfield);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        if buf.remaining() < Self::SERIALIZED_SIZE {
            bail!("packet is too short for a header: {} bytes", buf.remaining());
        }

        Ok(PacketHeader {
            magic: buf.get_u32(),
            sequence: buf.get_u32(),
            ack: buf.get_u32(),
            ack_bitfield: buf.get_u32(),
        })
    }
}

macro_rules! push_impl {
    ($push: ident, $ty: ty, $putter: ident) => {
        /// NB: panics if the value does not fit into the packet
        pub fn $push(&mut self, value: $ty) {
            self.$putter(value);
        }
    }
}

macro_rules! pop_impl {
    ($pop: ident, $ty: ty, $getter: ident) => {
        pub fn $pop(&mut self) -> anyhow::Result<$ty> {
            let mut unread = &self.buf[self.read_offset..self.write_offset];
            if unread.remaining() < size_of::<$ty>() {
                bail!("packet underflow: reading {} bytes at offset {}, packet length is {}", size_of::<$ty>(), self.read_offset, self.write_offset);
            }
            let value = unread.$getter();
            self.read_offset += size_of::<$ty>();
            Ok(value)
        }
    }
}

#[derive(Clone)]
pub struct Packet {
    buf: Vec<u8>,
    read_offset: usize,
    write_offset: usize,
}

impl Default for Packet {
    fn default() -> Self {
        Packet::new()
    }
}

impl Packet {
    pub fn new() -> Packet {
        Packet {
            buf: vec![0; MAX_PACKET_SIZE],
            read_offset: PacketHeader::SERIALIZED_SIZE,
            write_offset: PacketHeader::SERIALIZED_SIZE,
        }
    }

    /// Moves both cursors back to the start of the payload. Payload bytes are left as they are,
    ///  they are simply overwritten by subsequent pushes.
    pub fn init(&mut self) {
        self.read_offset = PacketHeader::SERIALIZED_SIZE;
        self.write_offset = PacketHeader::SERIALIZED_SIZE;
    }

    push_impl!(push_i32, i32, put_i32);
    push_impl!(push_u32, u32, put_u32);
    push_impl!(push_f32, f32, put_f32);
    push_impl!(push_f64, f64, put_f64);

    pop_impl!(pop_i32, i32, get_i32);
    pop_impl!(pop_u32, u32, get_u32);
    pop_impl!(pop_f32, f32, get_f32);
    pop_impl!(pop_f64, f64, get_f64);

    /// A packet is valid if it carries this protocol's magic number. This implies that it is long
    ///  enough to hold a complete header.
    pub fn is_valid(&self) -> bool {
        match self.header() {
            Ok(header) => header.magic == PROTOCOL_MAGIC,
            Err(_) => false,
        }
    }

    pub fn header(&self) -> anyhow::Result<PacketHeader> {
        PacketHeader::deser(&mut self.as_bytes())
    }

    pub fn write_header(&mut self, header: &PacketHeader) {
        let mut dst = &mut self.buf[..PacketHeader::SERIALIZED_SIZE];
        header.ser(&mut dst);
    }

    /// total length including the header
    pub fn len(&self) -> usize {
        self.write_offset
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.write_offset]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[PacketHeader::SERIALIZED_SIZE.min(self.write_offset)..self.write_offset]
    }

    pub fn payload_len(&self) -> usize {
        self.payload().len()
    }

    /// number of payload bytes that were not popped yet
    pub fn unread_len(&self) -> usize {
        self.write_offset - self.read_offset
    }

    /// The entire underlying buffer, for receiving a datagram into. Must be followed by
    ///  [Packet::set_received_len].
    pub fn receive_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn set_received_len(&mut self, len: usize) {
        assert!(len <= self.capacity(), "received length {} exceeds packet capacity", len);
        self.write_offset = len;
        self.read_offset = PacketHeader::SERIALIZED_SIZE.min(len);
    }

    /// This is a convenience function for test code, wrapping raw bytes as if they were received
    #[cfg(test)]
    pub fn from_received(data: &[u8]) -> Packet {
        let mut result = Packet::new();
        result.receive_buffer_mut()[..data.len()].copy_from_slice(data);
        result.set_received_len(data.len());
        result
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes().eq(other.as_bytes())
    }
}
impl Eq for Packet {}

impl Debug for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.header() {
            Ok(header) => write!(f, "Packet{{seq:{}, ack:{}, bits:{:#010x}, payload:{:?}}}", header.sequence, header.ack, header.ack_bitfield, self.payload()),
            Err(_) => write!(f, "Packet{{{:?}}}", self.as_bytes()),
        }
    }
}

unsafe impl BufMut for Packet {
    fn remaining_mut(&self) -> usize {
        self.buf.len() - self.write_offset
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(self.write_offset + cnt <= self.capacity(), "write beyond packet capacity");
        self.write_offset += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(&mut self.buf[self.write_offset..])
    }
}
