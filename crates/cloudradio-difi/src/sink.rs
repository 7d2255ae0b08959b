//! DIFI Sink
//!
//! Packs complex items into DIFI signal data packets and sends them to one
//! receiver over UDP or TCP.
//!
//! ## Modes
//!
//! - **Standalone**: the sink numbers and timestamps packets itself, starting
//!   from the configured reference time, and sends a context packet before
//!   every `context_interval`-th data packet.
//! - **Paired**: the sink relays a stream received by a [`DifiSource`]. The
//!   source's tags, handed in through [`DifiSink::work_tagged`], carry the
//!   context packets, packet numbers and timing; the sink sends no context
//!   of its own.
//!
//! Packet `k` after the reference is stamped
//! `reference + k * samples_per_packet / sample_rate`.
//!
//! Over TCP the sink connects on demand. While no receiver accepts, work
//! calls consume nothing and the host re-offers the input.
//!
//! [`DifiSource`]: crate::source::DifiSource

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use cloudradio_core::{BlockState, ItemFormat, Lifecycle, SinkBlock};
use cloudradio_observability::metrics::DIFI_PACKETS_SENT_TOTAL;
use serde::{Deserialize, Serialize};

use crate::config::{parse_or, required, resolve, SinkMode, SocketType};
use crate::error::{DifiError, Result};
use crate::packet::{
    class_id, ContextLayout, ContextPacket, DataPacket, PacketKind, Timestamp, DATA_STATIC_BITS,
    HEADER_SIZE, MAX_PACKET_SIZE, PACKET_COUNT_MODULUS, PICOS_PER_SECOND,
};
use crate::sample::{BitDepth, SampleCodec};
use crate::tag::{StreamTag, TagKind};
use crate::transport::Outbound;

fn default_samples_per_packet() -> usize {
    352
}

fn default_context_interval() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifiSinkConfig {
    pub host: String,

    pub port: u16,

    #[serde(default)]
    pub socket_type: SocketType,

    #[serde(default)]
    pub mode: SinkMode,

    /// Complex samples per data packet.
    #[serde(default = "default_samples_per_packet")]
    pub samples_per_packet: usize,

    #[serde(default)]
    pub stream_id: u32,

    /// Written to standard-layout context packets only.
    #[serde(default)]
    pub reference_point: u32,

    /// Samples per second.
    pub sample_rate: f64,

    #[serde(default)]
    pub packet_class: u32,

    #[serde(default)]
    pub oui: u32,

    /// Data packets between context packets (standalone mode).
    #[serde(default = "default_context_interval")]
    pub context_interval: u64,

    #[serde(default)]
    pub context_layout: ContextLayout,

    #[serde(default)]
    pub bit_depth: BitDepth,

    #[serde(default)]
    pub item_format: ItemFormat,

    /// Integer seconds of the first packet's timestamp.
    #[serde(default)]
    pub reference_time_full: u32,

    /// Picoseconds of the first packet's timestamp.
    #[serde(default)]
    pub reference_time_frac: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl DifiSinkConfig {
    pub fn new(host: impl Into<String>, port: u16, sample_rate: f64) -> Self {
        Self {
            host: host.into(),
            port,
            socket_type: SocketType::default(),
            mode: SinkMode::default(),
            samples_per_packet: default_samples_per_packet(),
            stream_id: 0,
            reference_point: 0,
            sample_rate,
            packet_class: 0,
            oui: 0,
            context_interval: default_context_interval(),
            context_layout: ContextLayout::default(),
            bit_depth: BitDepth::default(),
            item_format: ItemFormat::default(),
            reference_time_full: 0,
            reference_time_frac: 0,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let socket_type = config
            .get("socket.type")
            .map(|s| SocketType::from_str_config(s))
            .transpose()?
            .unwrap_or_default();
        let mode = config
            .get("mode")
            .map(|s| SinkMode::from_str_config(s))
            .transpose()?
            .unwrap_or_default();
        let context_layout = config
            .get("context.layout")
            .map(|s| ContextLayout::from_str_config(s))
            .transpose()?
            .unwrap_or_default();
        let item_format = config
            .get("item.format")
            .map(|s| ItemFormat::from_str_config(s))
            .transpose()?
            .unwrap_or_default();
        let bit_depth = BitDepth::from_bits(parse_or(config, "bit_depth", 16u32)?)?;

        let cfg = Self {
            host: required(config, "host")?,
            port: required(config, "port")?
                .trim()
                .parse()
                .map_err(|e| DifiError::Config(format!("invalid port: {}", e)))?,
            socket_type,
            mode,
            samples_per_packet: parse_or(
                config,
                "samples_per_packet",
                default_samples_per_packet(),
            )?,
            stream_id: parse_or(config, "stream.id", 0)?,
            reference_point: parse_or(config, "reference_point", 0)?,
            sample_rate: required(config, "sample_rate")?
                .trim()
                .parse()
                .map_err(|e| DifiError::Config(format!("invalid sample_rate: {}", e)))?,
            packet_class: parse_or(config, "packet_class", 0)?,
            oui: parse_or(config, "oui", 0)?,
            context_interval: parse_or(config, "context.interval", default_context_interval())?,
            context_layout,
            bit_depth,
            item_format,
            reference_time_full: parse_or(config, "time.full", 0)?,
            reference_time_frac: parse_or(config, "time.frac", 0)?,
            connect_timeout_ms: parse_or(
                config,
                "connect_timeout_ms",
                default_connect_timeout_ms(),
            )?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(DifiError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(DifiError::Config("port must not be 0".to_string()));
        }
        if self.samples_per_packet < 2 {
            return Err(DifiError::Config(
                "samples_per_packet must be at least 2".to_string(),
            ));
        }
        let payload = self
            .samples_per_packet
            .checked_mul(self.bit_depth.sample_bytes())
            .filter(|&n| n <= MAX_PACKET_SIZE - HEADER_SIZE)
            .ok_or_else(|| {
                DifiError::Config(format!(
                    "{} samples per packet exceed the {}-byte packet limit",
                    self.samples_per_packet, MAX_PACKET_SIZE
                ))
            })?;
        if payload % 4 != 0 {
            return Err(DifiError::Config(format!(
                "{} {}-bit samples do not fill whole 32-bit words",
                self.samples_per_packet,
                self.bit_depth.bits()
            )));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(DifiError::Config("sample_rate must be positive".to_string()));
        }
        if self.context_interval == 0 {
            return Err(DifiError::Config(
                "context.interval must be at least 1".to_string(),
            ));
        }
        if self.reference_time_frac >= PICOS_PER_SECOND {
            return Err(DifiError::Config(
                "time.frac must be below one second".to_string(),
            ));
        }
        SampleCodec::new(self.item_format, self.bit_depth)?;
        Ok(())
    }

    pub fn reference_time(&self) -> Timestamp {
        Timestamp::new(self.reference_time_full, self.reference_time_frac)
    }
}

pub struct DifiSink {
    name: String,
    config: DifiSinkConfig,
    codec: SampleCodec,
    lifecycle: Lifecycle,
    outbound: Option<Outbound>,
    // Standalone context, re-stamped for every send.
    context: ContextPacket,
    payload: BytesMut,
    samples_in_packet: usize,
    samples_per_packet: usize,
    sample_rate: f64,
    static_bits: u32,
    stream_id: u32,
    class_id: u64,
    pkt_n: u8,
    context_count: u8,
    reference: Timestamp,
    packets_since_reference: u64,
    data_packets_sent: u64,
}

impl std::fmt::Debug for DifiSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DifiSink")
            .field("name", &self.name)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("mode", &self.config.mode)
            .field("state", &self.lifecycle.state())
            .field("data_packets_sent", &self.data_packets_sent)
            .finish()
    }
}

impl DifiSink {
    pub fn new(name: impl Into<String>, config: DifiSinkConfig) -> Result<Self> {
        config.validate()?;
        let codec = SampleCodec::new(config.item_format, config.bit_depth)?;
        let class_id = class_id(config.oui, config.packet_class);
        let context = ContextPacket::for_stream(
            config.context_layout,
            config.stream_id,
            class_id,
            config.reference_point,
            config.sample_rate,
            config.bit_depth.payload_format(),
        );
        Ok(Self {
            name: name.into(),
            codec,
            lifecycle: Lifecycle::new(),
            outbound: None,
            context,
            payload: BytesMut::with_capacity(config.samples_per_packet * config.bit_depth.sample_bytes()),
            samples_in_packet: 0,
            samples_per_packet: config.samples_per_packet,
            sample_rate: config.sample_rate,
            static_bits: DATA_STATIC_BITS,
            stream_id: config.stream_id,
            class_id,
            pkt_n: 0,
            context_count: 0,
            reference: config.reference_time(),
            packets_since_reference: 0,
            data_packets_sent: 0,
            config,
        })
    }

    pub fn from_config_map(name: impl Into<String>, config: &HashMap<String, String>) -> Result<Self> {
        Self::new(name, DifiSinkConfig::from_config_map(config)?)
    }

    pub fn config(&self) -> &DifiSinkConfig {
        &self.config
    }

    pub fn state(&self) -> BlockState {
        self.lifecycle.state()
    }

    pub fn data_packets_sent(&self) -> u64 {
        self.data_packets_sent
    }

    /// Samples waiting for the current packet to fill.
    pub fn pending_samples(&self) -> usize {
        self.samples_in_packet
    }

    /// Like [`SinkBlock::work`], applying `tags` at their item offsets first.
    /// `first_offset` is the absolute offset of `input[0]`. Tags at or past
    /// the end of `input` are not applied; the caller passes them again with
    /// the next input. The input is consumed whole or not at all.
    pub async fn work_tagged(
        &mut self,
        input: &[u8],
        first_offset: u64,
        tags: &[StreamTag],
    ) -> Result<usize> {
        let result = self.work_inner(input, first_offset, tags).await;
        self.record_failure(&result);
        result
    }

    fn record_failure<T>(&mut self, result: &Result<T>) {
        if let Err(e) = result {
            if !e.is_recoverable() {
                tracing::error!(block = %self.name, error = %e, "DIFI sink failed");
                self.lifecycle.fail();
            }
        }
    }

    async fn ensure_streaming(&mut self) -> Result<()> {
        match self.lifecycle.state() {
            BlockState::Streaming => return Ok(()),
            BlockState::Uninitialized => {}
            other => {
                return Err(cloudradio_core::Error::InvalidTransition {
                    from: other,
                    to: BlockState::Streaming,
                }
                .into())
            }
        }

        let peer = resolve(&self.config.host, self.config.port).await?;
        let outbound = Outbound::open(
            self.config.socket_type,
            peer,
            Duration::from_millis(self.config.connect_timeout_ms),
        )
        .await?;
        self.lifecycle.transition(BlockState::Validated)?;
        self.outbound = Some(outbound);
        self.lifecycle.transition(BlockState::Streaming)?;

        tracing::info!(
            block = %self.name,
            peer = %peer,
            socket = ?self.config.socket_type,
            mode = ?self.config.mode,
            samples_per_packet = self.samples_per_packet,
            bit_depth = self.config.bit_depth.bits(),
            "DIFI sink streaming"
        );
        Ok(())
    }

    async fn work_inner(
        &mut self,
        input: &[u8],
        first_offset: u64,
        tags: &[StreamTag],
    ) -> Result<usize> {
        self.lifecycle.ensure_open()?;
        let n = self.codec.whole_items(input)?;
        self.ensure_streaming().await?;

        let ready = match self.outbound.as_mut() {
            Some(outbound) => outbound.ready().await,
            None => false,
        };
        if !ready {
            return Ok(0);
        }

        let end = first_offset + n as u64;
        let mut due: Vec<&StreamTag> = tags.iter().filter(|t| t.offset < end).collect();
        due.sort_by_key(|t| t.offset);

        let item_size = self.codec.item_size();
        let mut pos = 0;
        for tag in due {
            let at = tag.offset.saturating_sub(first_offset) as usize;
            if at > pos {
                self.push_items(&input[pos * item_size..at * item_size]).await?;
                pos = at;
            }
            self.apply_tag(&tag.kind).await?;
        }
        self.push_items(&input[pos * item_size..]).await?;
        Ok(n)
    }

    async fn push_items(&mut self, items: &[u8]) -> Result<()> {
        for item in items.chunks_exact(self.codec.item_size()) {
            self.codec.pack_item(item, &mut self.payload);
            self.samples_in_packet += 1;
            if self.samples_in_packet >= self.samples_per_packet {
                self.flush_packet().await?;
            }
        }
        Ok(())
    }

    fn current_timestamp(&self) -> Timestamp {
        let elapsed =
            self.samples_per_packet as f64 / self.sample_rate * self.packets_since_reference as f64;
        self.reference.offset_by(elapsed)
    }

    async fn flush_packet(&mut self) -> Result<()> {
        if self.config.mode == SinkMode::Standalone
            && self.data_packets_sent % self.config.context_interval == 0
        {
            self.send_context().await?;
        }

        let packet = DataPacket::encode(
            self.static_bits,
            self.pkt_n,
            self.stream_id,
            self.class_id,
            self.current_timestamp(),
            &self.payload,
        );
        self.send(&packet, PacketKind::Data).await?;

        self.pkt_n = (self.pkt_n + 1) % PACKET_COUNT_MODULUS;
        self.payload.clear();
        self.samples_in_packet = 0;
        self.packets_since_reference += 1;
        self.data_packets_sent += 1;
        Ok(())
    }

    async fn send_context(&mut self) -> Result<()> {
        self.context.count = self.context_count;
        if self.context.layout == ContextLayout::Standard {
            self.context.timestamp = Some(self.current_timestamp());
        }
        let packet = self.context.encode();
        self.send(&packet, PacketKind::Context).await?;
        self.context_count = (self.context_count + 1) % PACKET_COUNT_MODULUS;
        Ok(())
    }

    async fn send(&mut self, packet: &[u8], kind: PacketKind) -> Result<()> {
        let outbound = self
            .outbound
            .as_mut()
            .ok_or_else(|| DifiError::Config("socket is not open".to_string()))?;
        outbound.send(packet).await?;
        DIFI_PACKETS_SENT_TOTAL
            .with_label_values(&[self.name.as_str(), kind.as_str()])
            .inc();
        Ok(())
    }

    async fn apply_tag(&mut self, tag: &TagKind) -> Result<()> {
        if self.config.mode == SinkMode::Standalone {
            tracing::trace!(block = %self.name, tag = tag.as_str(), "ignoring tag in standalone mode");
            return Ok(());
        }

        match tag {
            TagKind::PacketNumber {
                count,
                samples_per_packet,
                timestamp,
            } => {
                if self.samples_in_packet > 0 {
                    tracing::debug!(
                        block = %self.name,
                        samples = self.samples_in_packet,
                        "dropping partial packet at numbering restart"
                    );
                }
                self.payload.clear();
                self.samples_in_packet = 0;
                self.pkt_n = count % PACKET_COUNT_MODULUS;
                if *samples_per_packet > 0 {
                    self.samples_per_packet = *samples_per_packet;
                }
                self.reference = *timestamp;
                self.packets_since_reference = 0;
            }
            TagKind::Context { raw, timestamp } => {
                match ContextPacket::decode(raw) {
                    Ok(ctx) => {
                        self.stream_id = ctx.stream_id;
                        self.class_id = ctx.class_id;
                        if ctx.sample_rate > 0.0 {
                            self.sample_rate = ctx.sample_rate;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(block = %self.name, error = %e, "relaying undecodable context packet");
                    }
                }
                self.send(raw, PacketKind::Context).await?;
                self.reference = *timestamp;
                self.packets_since_reference = 0;
            }
            TagKind::StaticChange(bits) => {
                self.static_bits = *bits;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SinkBlock for DifiSink {
    type Error = DifiError;

    async fn start(&mut self) -> Result<()> {
        tracing::info!(
            block = %self.name,
            host = %self.config.host,
            port = self.config.port,
            "DIFI sink started"
        );
        Ok(())
    }

    async fn work(&mut self, input: &[u8]) -> Result<usize> {
        let result = self.work_inner(input, 0, &[]).await;
        self.record_failure(&result);
        result
    }

    async fn stop(&mut self) -> Result<()> {
        match self.lifecycle.state() {
            BlockState::Closed => return Ok(()),
            BlockState::Failed => {
                return Err(cloudradio_core::Error::InvalidTransition {
                    from: BlockState::Failed,
                    to: BlockState::Closed,
                }
                .into())
            }
            _ => {}
        }

        if self.samples_in_packet > 0 {
            tracing::debug!(
                block = %self.name,
                samples = self.samples_in_packet,
                "discarding partial packet"
            );
            self.payload.clear();
            self.samples_in_packet = 0;
        }
        if let Some(mut outbound) = self.outbound.take() {
            outbound.shutdown().await;
        }
        self.lifecycle.transition(BlockState::Closed)?;
        tracing::info!(
            block = %self.name,
            packets = self.data_packets_sent,
            "DIFI sink stopped"
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
