//! DIFI packet codec
//!
//! DIFI is a profile of VITA-49.2. Every packet starts with the same
//! 28-byte prefix; all prefix and context fields are big-endian.
//!
//! ```text
//!  0       4        8            16      20           28
//!  +-------+--------+------------+-------+------------+---------------
//!  | header| stream | class id   | int   | fractional | payload ...
//!  | word  | id     | (OUI, pkt  | secs  | picoseconds|
//!  |       |        |  class)    |       |            |
//!  +-------+--------+------------+-------+------------+---------------
//! ```
//!
//! Header word: bits 28..32 packet type (1 = signal data, 4 = context),
//! bits 16..20 the modulo-16 packet count, bits 0..16 the packet size in
//! 32-bit words. Bits 20..32 are the "static" part that stays fixed for a
//! stream.
//!
//! Context packets come in two layouts: the standard 108-byte flow signal
//! context, and a 72-byte compact layout without timestamp fields that some
//! hardware emits.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{DifiError, Result};

pub const HEADER_SIZE: usize = 28;
pub const PACKET_COUNT_MODULUS: u8 = 16;
pub const PICOS_PER_SECOND: u64 = 1_000_000_000_000;

/// Largest packet a source will accept (jumbo frame).
pub const MAX_PACKET_SIZE: usize = 9000;

pub const DATA_STATIC_BITS: u32 = 0x18e0_0000;
pub const CONTEXT_STATIC_BITS: u32 = 0x4900_0000;

pub const STANDARD_CONTEXT_SIZE: usize = 108;
pub const COMPACT_CONTEXT_SIZE: usize = 72;

/// No state or event indicators set.
pub const DEFAULT_STATE_AND_EVENTS: u32 = 0xa00a_0000;

const COMPACT_CONTEXT_CIF: u32 = 0x39a1_8000;

const STATIC_MASK: u32 = 0xfff0_0000;

/// VITA fixed-point frequencies carry 20 fractional bits.
const VITA_FIXED_ONE: f64 = (1u64 << 20) as f64;

pub fn to_vita_fixed(hz: f64) -> u64 {
    (hz.max(0.0) * VITA_FIXED_ONE).round() as u64
}

pub fn from_vita_fixed(bits: u64) -> f64 {
    bits as f64 / VITA_FIXED_ONE
}

/// `oui` in the upper word, packet class code in the lower.
pub fn class_id(oui: u32, packet_class: u32) -> u64 {
    (u64::from(oui) << 32) ^ u64::from(packet_class)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Data,
    Context,
    Other(u8),
}

impl PacketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketKind::Data => "data",
            PacketKind::Context => "context",
            PacketKind::Other(_) => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub word: u32,
    pub stream_id: u32,
}

impl PacketHeader {
    pub fn new(static_bits: u32, count: u8, size_bytes: usize, stream_id: u32) -> Self {
        let count = u32::from(count % PACKET_COUNT_MODULUS);
        let size_words = (size_bytes / 4) as u32 & 0xffff;
        Self {
            word: (static_bits & STATIC_MASK) ^ (count << 16) ^ size_words,
            stream_id,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(DifiError::Malformed(format!(
                "{} bytes is too short for a packet header",
                buf.len()
            )));
        }
        let mut buf = buf;
        Ok(Self {
            word: buf.get_u32(),
            stream_id: buf.get_u32(),
        })
    }

    pub fn kind(&self) -> PacketKind {
        match (self.word >> 28) as u8 {
            1 => PacketKind::Data,
            4 => PacketKind::Context,
            other => PacketKind::Other(other),
        }
    }

    pub fn count(&self) -> u8 {
        ((self.word >> 16) & 0xf) as u8
    }

    pub fn size_bytes(&self) -> usize {
        (self.word & 0xffff) as usize * 4
    }

    pub fn static_bits(&self) -> u32 {
        self.word & STATIC_MASK
    }
}

/// Integer seconds plus picoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub full: u32,
    pub frac: u64,
}

impl Timestamp {
    pub fn new(full: u32, frac: u64) -> Self {
        Self { full, frac }
    }

    /// The timestamp `seconds` later. The picosecond field carries into the
    /// integer field and stays below one second.
    pub fn offset_by(&self, seconds: f64) -> Self {
        let seconds = seconds.max(0.0);
        let whole = seconds.trunc();
        let mut frac = self.frac % PICOS_PER_SECOND
            + ((seconds - whole) * PICOS_PER_SECOND as f64) as u64;
        let mut full = self.full.wrapping_add(whole as u32);
        if frac >= PICOS_PER_SECOND {
            frac -= PICOS_PER_SECOND;
            full = full.wrapping_add(1);
        }
        Self { full, frac }
    }

    fn read(mut buf: &[u8]) -> Self {
        Self {
            full: buf.get_u32(),
            frac: buf.get_u64(),
        }
    }
}

/// A decoded signal data packet. The payload is left packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub header: PacketHeader,
    pub class_id: u64,
    pub timestamp: Timestamp,
    pub payload: Bytes,
}

impl DataPacket {
    pub fn encode(
        static_bits: u32,
        count: u8,
        stream_id: u32,
        class_id: u64,
        timestamp: Timestamp,
        payload: &[u8],
    ) -> Bytes {
        let len = HEADER_SIZE + payload.len();
        let header = PacketHeader::new(static_bits, count, len, stream_id);
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u32(header.word);
        buf.put_u32(header.stream_id);
        buf.put_u64(class_id);
        buf.put_u32(timestamp.full);
        buf.put_u64(timestamp.frac);
        buf.put_slice(payload);
        buf.freeze()
    }

    pub fn decode(packet: Bytes) -> Result<Self> {
        let header = PacketHeader::parse(&packet)?;
        if header.kind() != PacketKind::Data {
            return Err(DifiError::Malformed(format!(
                "expected a data packet, header is {:#010x}",
                header.word
            )));
        }
        if packet.len() < HEADER_SIZE {
            return Err(DifiError::Malformed(format!(
                "data packet of {} bytes has no room for its prefix",
                packet.len()
            )));
        }
        let class_id = (&packet[8..16]).get_u64();
        let timestamp = Timestamp::read(&packet[16..HEADER_SIZE]);
        Ok(Self {
            header,
            class_id,
            timestamp,
            payload: packet.slice(HEADER_SIZE..),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextLayout {
    #[default]
    Standard,
    Compact,
}

impl ContextLayout {
    pub fn size(&self) -> usize {
        match self {
            ContextLayout::Standard => STANDARD_CONTEXT_SIZE,
            ContextLayout::Compact => COMPACT_CONTEXT_SIZE,
        }
    }

    pub fn from_str_config(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(ContextLayout::Standard),
            "compact" => Ok(ContextLayout::Compact),
            other => Err(DifiError::Config(format!("unknown context layout: '{}'", other))),
        }
    }

    pub fn from_size(size: usize) -> Result<Self> {
        match size {
            STANDARD_CONTEXT_SIZE => Ok(ContextLayout::Standard),
            COMPACT_CONTEXT_SIZE => Ok(ContextLayout::Compact),
            other => Err(DifiError::Config(format!(
                "context packet size must be {} or {}, got {}",
                STANDARD_CONTEXT_SIZE, COMPACT_CONTEXT_SIZE, other
            ))),
        }
    }
}

/// Standard flow signal context. Frequencies are in Hz.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPacket {
    pub layout: ContextLayout,
    pub stream_id: u32,
    pub count: u8,
    pub class_id: u64,
    /// Absent from the compact layout.
    pub timestamp: Option<Timestamp>,
    pub cif: u32,
    pub reference_point: u32,
    pub bandwidth: f64,
    pub if_reference_frequency: u64,
    pub rf_reference_frequency: u64,
    pub if_band_offset: u64,
    pub reference_level: u32,
    pub gain: u32,
    pub sample_rate: f64,
    pub timestamp_adjustment: u64,
    pub timestamp_calibration_time: u32,
    pub state_and_events: u32,
    pub payload_format: u64,
}

impl ContextPacket {
    /// Context for a stream with no frequency or gain information: 80% of
    /// the sample rate as bandwidth, no state or events.
    pub fn for_stream(
        layout: ContextLayout,
        stream_id: u32,
        class_id: u64,
        reference_point: u32,
        sample_rate: f64,
        payload_format: u64,
    ) -> Self {
        Self {
            layout,
            stream_id,
            count: 0,
            class_id,
            timestamp: match layout {
                ContextLayout::Standard => Some(Timestamp::default()),
                ContextLayout::Compact => None,
            },
            cif: match layout {
                ContextLayout::Standard => 0,
                ContextLayout::Compact => COMPACT_CONTEXT_CIF,
            },
            reference_point,
            bandwidth: sample_rate * 0.8,
            if_reference_frequency: 0,
            rf_reference_frequency: 0,
            if_band_offset: 0,
            reference_level: 0,
            gain: 0,
            sample_rate,
            timestamp_adjustment: 0,
            timestamp_calibration_time: 0,
            state_and_events: DEFAULT_STATE_AND_EVENTS,
            payload_format,
        }
    }

    pub fn encode(&self) -> Bytes {
        let size = self.layout.size();
        let header = PacketHeader::new(CONTEXT_STATIC_BITS, self.count, size, self.stream_id);
        let mut buf = BytesMut::with_capacity(size);
        buf.put_u32(header.word);
        buf.put_u32(header.stream_id);
        buf.put_u64(self.class_id);

        match self.layout {
            ContextLayout::Standard => {
                let ts = self.timestamp.unwrap_or_default();
                buf.put_u32(ts.full);
                buf.put_u64(ts.frac);
                buf.put_u32(self.cif);
                buf.put_u32(self.reference_point);
                buf.put_u64(to_vita_fixed(self.bandwidth));
                buf.put_u64(self.if_reference_frequency);
                buf.put_u64(self.rf_reference_frequency);
                buf.put_u64(self.if_band_offset);
                buf.put_u32(self.reference_level);
                buf.put_u32(self.gain);
                buf.put_u64(to_vita_fixed(self.sample_rate));
                buf.put_u64(self.timestamp_adjustment);
                buf.put_u32(self.timestamp_calibration_time);
                buf.put_u32(self.state_and_events);
                buf.put_u64(self.payload_format);
            }
            ContextLayout::Compact => {
                buf.put_u32(self.cif);
                buf.put_u64(to_vita_fixed(self.bandwidth));
                buf.put_u64(self.if_reference_frequency);
                buf.put_u64(self.rf_reference_frequency);
                buf.put_u64(self.if_band_offset);
                buf.put_u64(to_vita_fixed(self.sample_rate));
                buf.put_u32(self.state_and_events);
                buf.put_u64(self.payload_format);
            }
        }
        debug_assert_eq!(buf.len(), size);
        buf.freeze()
    }

    /// A 72-byte packet decodes with the compact layout, anything of at
    /// least 108 bytes with the standard one.
    pub fn decode(packet: &[u8]) -> Result<Self> {
        let header = PacketHeader::parse(packet)?;
        if header.kind() != PacketKind::Context {
            return Err(DifiError::Malformed(format!(
                "expected a context packet, header is {:#010x}",
                header.word
            )));
        }
        let layout = if packet.len() == COMPACT_CONTEXT_SIZE {
            ContextLayout::Compact
        } else if packet.len() >= STANDARD_CONTEXT_SIZE {
            ContextLayout::Standard
        } else {
            return Err(DifiError::Malformed(format!(
                "context packet of {} bytes matches no known layout",
                packet.len()
            )));
        };

        let mut buf = &packet[8..];
        let class_id = buf.get_u64();
        let mut ctx = Self {
            layout,
            stream_id: header.stream_id,
            count: header.count(),
            class_id,
            timestamp: None,
            cif: 0,
            reference_point: 0,
            bandwidth: 0.0,
            if_reference_frequency: 0,
            rf_reference_frequency: 0,
            if_band_offset: 0,
            reference_level: 0,
            gain: 0,
            sample_rate: 0.0,
            timestamp_adjustment: 0,
            timestamp_calibration_time: 0,
            state_and_events: 0,
            payload_format: 0,
        };

        match layout {
            ContextLayout::Standard => {
                ctx.timestamp = Some(Timestamp::new(buf.get_u32(), buf.get_u64()));
                ctx.cif = buf.get_u32();
                ctx.reference_point = buf.get_u32();
                ctx.bandwidth = from_vita_fixed(buf.get_u64());
                ctx.if_reference_frequency = buf.get_u64();
                ctx.rf_reference_frequency = buf.get_u64();
                ctx.if_band_offset = buf.get_u64();
                ctx.reference_level = buf.get_u32();
                ctx.gain = buf.get_u32();
                ctx.sample_rate = from_vita_fixed(buf.get_u64());
                ctx.timestamp_adjustment = buf.get_u64();
                ctx.timestamp_calibration_time = buf.get_u32();
                ctx.state_and_events = buf.get_u32();
                ctx.payload_format = buf.get_u64();
            }
            ContextLayout::Compact => {
                ctx.cif = buf.get_u32();
                ctx.bandwidth = from_vita_fixed(buf.get_u64());
                ctx.if_reference_frequency = buf.get_u64();
                ctx.rf_reference_frequency = buf.get_u64();
                ctx.if_band_offset = buf.get_u64();
                ctx.sample_rate = from_vita_fixed(buf.get_u64());
                ctx.state_and_events = buf.get_u32();
                ctx.payload_format = buf.get_u64();
            }
        }
        Ok(ctx)
    }

    /// Bits per sample component announced by the payload format.
    pub fn announced_bit_depth(&self) -> u32 {
        ((self.payload_format >> 32) & 0x1f) as u32 + 1
    }
}
