//! Wire formats for the shared medium.
//!
//! Two frame classes cross the medium: 32-byte-class DATA frames and
//! 2-byte DATA_SHORT frames. The high two bits of byte 0 select the DATA
//! variant: `1x` is a user-data fragment, `01` a link-state advertisement,
//! `00` an addressing frame. A DATA_SHORT is an ACK when byte 0 is zero
//! and a keep-alive otherwise.

use crate::NodeId;

/// Fixed envelope size of link-state and addressing frames.
pub const FRAME_LEN: usize = 32;

/// Header bytes preceding a fragment's payload.
pub const HEADER_LEN: usize = 9;

/// Largest payload a single fragment can carry.
pub const MAX_PAYLOAD: usize = FRAME_LEN - HEADER_LEN;

/// Largest series length encodable in byte 0's low seven bits.
pub const MAX_FRAGMENTS: u8 = 0x7F;

/// Largest number of `(destination, cost)` pairs fitting the link-state
/// envelope.
pub const MAX_LINK_STATE_ENTRIES: usize = (FRAME_LEN - 4) / 2;

/// Largest number of known-address bytes fitting the addressing envelope.
pub const MAX_KNOWN_ADDRESSES: usize = FRAME_LEN - 4;

/// Time-to-live carried by every addressing frame.
pub const ADDRESSING_TTL: u8 = 10;

const KIND_DATA: u8 = 0x80;
const KIND_LINK_STATE: u8 = 0x40;
const LINK_STATE_SENTINEL: u8 = 0xFF;
const KEEP_ALIVE_TAG: u8 = 0xC0;

/// One fragment of a chunked user message.
///
/// Fragments of one series share the `fragments` count and the `nonce`
/// pair; `next_hop` and `prev_hop` are rewritten at every relay while
/// `source` and `dest` identify the endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Series length N; this fragment's `seq` lies in `1..=N`.
    pub fragments: u8,
    pub next_hop: NodeId,
    pub source: NodeId,
    pub dest: NodeId,
    pub seq: u8,
    pub prev_hop: NodeId,
    pub nonce: (u8, u8),
    pub payload: Vec<u8>,
}

/// A distance-vector advertisement: the sender's reachable destinations
/// and their hop costs. The entry list starts with the sender's own
/// `(id, 0)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStateFrame {
    pub source: NodeId,
    pub entries: Vec<(NodeId, u8)>,
}

/// Reply/gossip discriminator of an addressing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingFlag {
    /// Final frame: a node announcing the identifier it just picked,
    /// advertising its merged known set.
    Reply,
    /// Non-final gossip of a known-address set, including an assigned
    /// node's answer to an exploration request.
    Gossip,
}

/// An address-acquisition frame. `source == NODE_UNASSIGNED` marks an
/// exploration request from a newcomer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressingFrame {
    pub flag: AddressingFlag,
    pub source: NodeId,
    pub known: Vec<NodeId>,
}

/// Any decoded DATA frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    LinkState(LinkStateFrame),
    Addressing(AddressingFrame),
}

/// Any decoded DATA_SHORT frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortFrame {
    /// Acknowledges the transmission of the named node.
    Ack(NodeId),
    /// Liveness beacon of the named node.
    KeepAlive(NodeId),
}

/// Decode a DATA frame, dispatching on the high two bits of byte 0.
pub fn de_frame(bytes: &[u8]) -> Option<Frame> {
    let first = *bytes.first()?;
    if first & KIND_DATA != 0 {
        DataFrame::decode(bytes).map(Frame::Data)
    } else if first & KIND_LINK_STATE != 0 {
        LinkStateFrame::decode(bytes).map(Frame::LinkState)
    } else {
        AddressingFrame::decode(bytes).map(Frame::Addressing)
    }
}

// ---- impl DataFrame ----

impl DataFrame {
    /// Encoded length: 9-byte header plus payload, no padding.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD);
        let len = HEADER_LEN + self.payload.len();
        let mut buf = Vec::with_capacity(len);
        buf.push(KIND_DATA | (self.fragments & MAX_FRAGMENTS));
        buf.push(len as u8);
        buf.push(self.next_hop);
        buf.push(self.source);
        buf.push(self.dest);
        buf.push(self.seq);
        buf.push(self.prev_hop);
        buf.push(self.nonce.0);
        buf.push(self.nonce.1);
        buf.extend_from_slice(&self.payload);
        buf
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let len = bytes[1] as usize;
        if len < HEADER_LEN || len > bytes.len() {
            return None;
        }
        Some(Self {
            fragments: bytes[0] & MAX_FRAGMENTS,
            next_hop: bytes[2],
            source: bytes[3],
            dest: bytes[4],
            seq: bytes[5] & MAX_FRAGMENTS,
            prev_hop: bytes[6],
            nonce: (bytes[7], bytes[8]),
            payload: bytes[HEADER_LEN..len].to_vec(),
        })
    }
}

// ---- impl LinkStateFrame ----

impl LinkStateFrame {
    /// Fixed 32-byte envelope. Byte 2 carries the advertised length,
    /// inclusive of the 4-byte prologue: `4 + 2 * entries`.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        debug_assert!(self.entries.len() <= MAX_LINK_STATE_ENTRIES);
        let mut buf = [0u8; FRAME_LEN];
        let entries = &self.entries[..self.entries.len().min(MAX_LINK_STATE_ENTRIES)];
        buf[0] = KIND_LINK_STATE;
        buf[1] = self.source;
        buf[2] = (4 + 2 * entries.len()) as u8;
        buf[3] = LINK_STATE_SENTINEL;
        for (k, (dest, cost)) in entries.iter().enumerate() {
            buf[4 + 2 * k] = *dest;
            buf[5 + 2 * k] = *cost;
        }
        buf
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        let len = bytes[2] as usize;
        if len < 4 || len > bytes.len() || (len - 4) % 2 != 0 {
            return None;
        }
        let entries = bytes[4..len]
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();
        Some(Self {
            source: bytes[1],
            entries,
        })
    }
}

// ---- impl AddressingFrame ----

impl AddressingFrame {
    /// Known sets larger than the envelope are truncated; the gossip is
    /// best-effort anyway.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        let known = &self.known[..self.known.len().min(MAX_KNOWN_ADDRESSES)];
        buf[0] = known.len() as u8;
        buf[1] = match self.flag {
            AddressingFlag::Reply => 1,
            AddressingFlag::Gossip => 0,
        };
        buf[2] = self.source;
        buf[3] = ADDRESSING_TTL;
        buf[4..4 + known.len()].copy_from_slice(known);
        buf
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        let count = bytes[0] as usize;
        if 4 + count > bytes.len() {
            return None;
        }
        Some(Self {
            flag: if bytes[1] == 1 {
                AddressingFlag::Reply
            } else {
                AddressingFlag::Gossip
            },
            source: bytes[2],
            known: bytes[4..4 + count].to_vec(),
        })
    }
}

// ---- impl ShortFrame ----

impl ShortFrame {
    pub fn encode(&self) -> [u8; 2] {
        match *self {
            ShortFrame::Ack(id) => [0x00, id],
            ShortFrame::KeepAlive(id) => [KEEP_ALIVE_TAG, id],
        }
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }
        Some(if bytes[0] == 0 {
            ShortFrame::Ack(bytes[1])
        } else {
            ShortFrame::KeepAlive(bytes[1])
        })
    }
}
