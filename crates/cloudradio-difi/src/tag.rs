//! Stream tags.
//!
//! A source marks stream events against the item offset where they take
//! effect. A paired sink replays them at the same offsets, so the relayed
//! stream keeps the packet numbering, timing and context of the original.

use bytes::Bytes;

use crate::packet::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagKind {
    /// Data packet that starts a numbering run: the first one, or the one
    /// after a gap.
    PacketNumber {
        count: u8,
        samples_per_packet: usize,
        timestamp: Timestamp,
    },
    /// Raw context packet, effective from this item on. The timestamp is the
    /// context's own, or the last data packet's for the compact layout.
    Context { raw: Bytes, timestamp: Timestamp },
    /// The static header bits of the data packets changed.
    StaticChange(u32),
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::PacketNumber { .. } => "packet_number",
            TagKind::Context { .. } => "context",
            TagKind::StaticChange(_) => "static_change",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTag {
    /// Absolute item index in the source's output.
    pub offset: u64,
    pub kind: TagKind,
}

impl StreamTag {
    pub fn new(offset: u64, kind: TagKind) -> Self {
        Self { offset, kind }
    }
}
