//! DIFI Source
//!
//! Receives DIFI packets over UDP, or from one TCP peer at a time, and emits
//! the data packets' samples as complex items.
//!
//! Context packets produce no items. Each one is checked against the
//! configured bit depth and then attached as a tag to the first item of the
//! next data packet. Tags also mark the first data packet, any gap in the
//! packet count and any change of the static header bits; collect them with
//! [`DifiSource::take_tags`].
//!
//! Packets for another stream, undecodable packets and packets of unknown
//! type are logged and skipped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cloudradio_core::{BlockState, ItemFormat, Lifecycle, ReadBuffer, SourceBlock, WorkStatus};
use cloudradio_observability::metrics::{DIFI_OUT_OF_ORDER_TOTAL, DIFI_PACKETS_RECEIVED_TOTAL};
use serde::{Deserialize, Serialize};

use crate::config::{parse_or, required, resolve, SocketType};
use crate::error::{DifiError, Result};
use crate::packet::{
    ContextPacket, DataPacket, PacketHeader, PacketKind, Timestamp, PACKET_COUNT_MODULUS,
};
use crate::sample::{BitDepth, SampleCodec};
use crate::tag::{StreamTag, TagKind};
use crate::transport::Inbound;

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_recv_timeout_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifiSourceConfig {
    /// Local address to bind.
    #[serde(default = "default_bind_host")]
    pub host: String,

    /// Zero picks a free port.
    pub port: u16,

    #[serde(default)]
    pub socket_type: SocketType,

    /// Only packets of this stream are used; `None` accepts any.
    #[serde(default)]
    pub stream_id: Option<u32>,

    #[serde(default)]
    pub bit_depth: BitDepth,

    #[serde(default)]
    pub item_format: ItemFormat,

    /// Longest a work call waits for a packet.
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
}

impl DifiSourceConfig {
    pub fn new(port: u16) -> Self {
        Self {
            host: default_bind_host(),
            port,
            socket_type: SocketType::default(),
            stream_id: None,
            bit_depth: BitDepth::default(),
            item_format: ItemFormat::default(),
            recv_timeout_ms: default_recv_timeout_ms(),
        }
    }

    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let socket_type = config
            .get("socket.type")
            .map(|s| SocketType::from_str_config(s))
            .transpose()?
            .unwrap_or_default();
        let item_format = config
            .get("item.format")
            .map(|s| ItemFormat::from_str_config(s))
            .transpose()?
            .unwrap_or_default();
        let stream_id = config
            .get("stream.id")
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<u32>()
                    .map_err(|e| DifiError::Config(format!("invalid stream.id: {}", e)))
            })
            .transpose()?;

        let cfg = Self {
            host: config.get("host").cloned().unwrap_or_else(default_bind_host),
            port: required(config, "port")?
                .trim()
                .parse()
                .map_err(|e| DifiError::Config(format!("invalid port: {}", e)))?,
            socket_type,
            stream_id,
            bit_depth: BitDepth::from_bits(parse_or(config, "bit_depth", 16u32)?)?,
            item_format,
            recv_timeout_ms: parse_or(config, "recv_timeout_ms", default_recv_timeout_ms())?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(DifiError::Config("host must not be empty".to_string()));
        }
        if self.recv_timeout_ms == 0 {
            return Err(DifiError::Config(
                "recv_timeout_ms must be at least 1".to_string(),
            ));
        }
        SampleCodec::new(self.item_format, self.bit_depth)?;
        Ok(())
    }
}

pub struct DifiSource {
    name: String,
    config: DifiSourceConfig,
    codec: SampleCodec,
    lifecycle: Lifecycle,
    inbound: Option<Inbound>,
    buffer: ReadBuffer,
    // Items decoded so far; the offset of the next decoded item.
    decoded_items: u64,
    last_pkt_n: Option<u8>,
    static_bits: Option<u32>,
    last_timestamp: Timestamp,
    pending_context: Option<(Bytes, Timestamp)>,
    tags: Vec<StreamTag>,
    data_packets_received: u64,
}

impl std::fmt::Debug for DifiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DifiSource")
            .field("name", &self.name)
            .field("port", &self.config.port)
            .field("state", &self.lifecycle.state())
            .field("decoded_items", &self.decoded_items)
            .field("data_packets_received", &self.data_packets_received)
            .finish()
    }
}

impl DifiSource {
    pub fn new(name: impl Into<String>, config: DifiSourceConfig) -> Result<Self> {
        config.validate()?;
        let codec = SampleCodec::new(config.item_format, config.bit_depth)?;
        Ok(Self {
            name: name.into(),
            buffer: ReadBuffer::new(codec.item_size()),
            codec,
            config,
            lifecycle: Lifecycle::new(),
            inbound: None,
            decoded_items: 0,
            last_pkt_n: None,
            static_bits: None,
            last_timestamp: Timestamp::default(),
            pending_context: None,
            tags: Vec::new(),
            data_packets_received: 0,
        })
    }

    pub fn from_config_map(name: impl Into<String>, config: &HashMap<String, String>) -> Result<Self> {
        Self::new(name, DifiSourceConfig::from_config_map(config)?)
    }

    pub fn config(&self) -> &DifiSourceConfig {
        &self.config
    }

    pub fn state(&self) -> BlockState {
        self.lifecycle.state()
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inbound.as_ref().and_then(|i| i.local_addr().ok())
    }

    pub fn data_packets_received(&self) -> u64 {
        self.data_packets_received
    }

    /// Tags collected since the last call, in offset order.
    pub fn take_tags(&mut self) -> Vec<StreamTag> {
        std::mem::take(&mut self.tags)
    }

    async fn bind(&mut self) -> Result<()> {
        if self.inbound.is_some() {
            return Ok(());
        }
        let addr = resolve(&self.config.host, self.config.port).await?;
        let inbound = Inbound::bind(self.config.socket_type, addr).await?;
        let local = inbound.local_addr()?;
        tracing::info!(
            block = %self.name,
            addr = %local,
            socket = ?self.config.socket_type,
            bit_depth = self.config.bit_depth.bits(),
            "DIFI source listening"
        );
        self.inbound = Some(inbound);
        self.lifecycle.transition(BlockState::Validated)?;
        Ok(())
    }

    async fn work_inner(&mut self, output: &mut [u8]) -> Result<WorkStatus> {
        match self.lifecycle.state() {
            BlockState::Closed => return Ok(WorkStatus::Done),
            BlockState::Uninitialized => self.bind().await?,
            _ => {}
        }
        self.lifecycle.ensure_open()?;
        if self.lifecycle.state() == BlockState::Validated {
            self.lifecycle.transition(BlockState::Streaming)?;
        }

        if !self.buffer.is_exhausted() {
            return Ok(WorkStatus::Produced(self.buffer.fill(output)));
        }

        let wait = Duration::from_millis(self.config.recv_timeout_ms);
        let packet = match self.inbound.as_mut() {
            Some(inbound) => inbound.recv(wait).await?,
            None => None,
        };
        if let Some(packet) = packet {
            self.handle_packet(packet)?;
        }
        Ok(WorkStatus::Produced(self.buffer.fill(output)))
    }

    fn handle_packet(&mut self, packet: Bytes) -> Result<()> {
        let header = match PacketHeader::parse(&packet) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(block = %self.name, error = %e, "skipping packet");
                return Ok(());
            }
        };
        let size = header.size_bytes();
        if size < 8 || size > packet.len() {
            tracing::warn!(
                block = %self.name,
                announced = size,
                received = packet.len(),
                "skipping packet with inconsistent size"
            );
            return Ok(());
        }
        let packet = packet.slice(..size);

        if let Some(expected) = self.config.stream_id {
            if header.stream_id != expected {
                tracing::warn!(
                    block = %self.name,
                    stream_id = header.stream_id,
                    expected,
                    "skipping packet of another stream"
                );
                return Ok(());
            }
        }

        let kind = header.kind();
        DIFI_PACKETS_RECEIVED_TOTAL
            .with_label_values(&[self.name.as_str(), kind.as_str()])
            .inc();
        match kind {
            PacketKind::Data => self.handle_data(packet),
            PacketKind::Context => self.handle_context(packet),
            PacketKind::Other(t) => {
                tracing::debug!(block = %self.name, packet_type = t, "skipping packet of unhandled type");
                Ok(())
            }
        }
    }

    fn handle_data(&mut self, packet: Bytes) -> Result<()> {
        let data = match DataPacket::decode(packet) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(block = %self.name, error = %e, "skipping data packet");
                return Ok(());
            }
        };
        let offset = self.decoded_items;
        let count = data.header.count();
        let static_bits = data.header.static_bits();
        let sample_bytes = self.config.bit_depth.sample_bytes();
        if data.payload.len() % sample_bytes != 0 {
            tracing::warn!(
                block = %self.name,
                payload = data.payload.len(),
                bit_depth = self.config.bit_depth.bits(),
                "payload does not hold whole samples; check the bit depth"
            );
        }

        if self.static_bits != Some(static_bits) {
            self.static_bits = Some(static_bits);
            self.tags
                .push(StreamTag::new(offset, TagKind::StaticChange(static_bits)));
        }

        let restart = match self.last_pkt_n {
            None => true,
            Some(last) => {
                let expected = (last + 1) % PACKET_COUNT_MODULUS;
                if count != expected {
                    tracing::warn!(
                        block = %self.name,
                        got = count,
                        expected,
                        "out of order packet"
                    );
                    DIFI_OUT_OF_ORDER_TOTAL
                        .with_label_values(&[self.name.as_str()])
                        .inc();
                }
                count != expected
            }
        };
        if restart {
            self.tags.push(StreamTag::new(
                offset,
                TagKind::PacketNumber {
                    count,
                    samples_per_packet: data.payload.len() / sample_bytes,
                    timestamp: data.timestamp,
                },
            ));
        }

        if let Some((raw, timestamp)) = self.pending_context.take() {
            self.tags
                .push(StreamTag::new(offset, TagKind::Context { raw, timestamp }));
        }

        self.last_pkt_n = Some(count);
        self.last_timestamp = data.timestamp;
        self.data_packets_received += 1;

        let mut items = Vec::with_capacity(data.payload.len() / sample_bytes * self.codec.item_size());
        let n = self.codec.unpack(&data.payload, &mut items);
        self.buffer.replace(Bytes::from(items));
        self.decoded_items += n as u64;
        Ok(())
    }

    fn handle_context(&mut self, packet: Bytes) -> Result<()> {
        let ctx = match ContextPacket::decode(&packet) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(block = %self.name, error = %e, "skipping context packet");
                return Ok(());
            }
        };
        let announced = ctx.announced_bit_depth();
        let configured = self.config.bit_depth.bits();
        if announced != configured {
            return Err(DifiError::BitDepthMismatch {
                announced,
                configured,
            });
        }
        tracing::trace!(
            block = %self.name,
            stream_id = ctx.stream_id,
            sample_rate = ctx.sample_rate,
            "context packet"
        );
        let timestamp = ctx.timestamp.unwrap_or(self.last_timestamp);
        self.pending_context = Some((packet, timestamp));
        Ok(())
    }
}

#[async_trait]
impl SourceBlock for DifiSource {
    type Error = DifiError;

    async fn start(&mut self) -> Result<()> {
        self.lifecycle.ensure_open()?;
        if let Err(e) = self.bind().await {
            tracing::error!(block = %self.name, error = %e, "DIFI source failed to bind");
            self.lifecycle.fail();
            return Err(e);
        }
        Ok(())
    }

    async fn work(&mut self, output: &mut [u8]) -> Result<WorkStatus> {
        let result = self.work_inner(output).await;
        if let Err(e) = &result {
            if !e.is_recoverable() {
                tracing::error!(block = %self.name, error = %e, "DIFI source failed");
                self.lifecycle.fail();
            }
        }
        result
    }

    async fn stop(&mut self) -> Result<()> {
        if self.lifecycle.state() == BlockState::Closed {
            return Ok(());
        }
        self.inbound = None;
        self.buffer.clear();
        if self.lifecycle.state() != BlockState::Failed {
            self.lifecycle.transition(BlockState::Closed)?;
        }
        tracing::info!(
            block = %self.name,
            packets = self.data_packets_received,
            items = self.decoded_items,
            "DIFI source stopped"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn item_size(&self) -> usize {
        self.codec.item_size()
    }
}
