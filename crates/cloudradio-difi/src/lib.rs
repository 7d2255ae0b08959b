//! DIFI (VITA-49.2) stream blocks.
//!
//! - [`DifiSink`] packs complex items into DIFI signal data packets and sends
//!   them, with periodic context packets, to one receiver over UDP or TCP.
//! - [`DifiSource`] receives DIFI packets and emits their samples, tagging
//!   context packets, packet-count gaps and header changes against the items
//!   they apply to.
//!
//! A source feeding a sink in [`SinkMode::Paired`] relays a stream with its
//! numbering, timing and context intact.
//!
//! ## Example
//!
//! ```ignore
//! use cloudradio_core::{SinkBlock, SourceBlock};
//! use cloudradio_difi::{DifiSink, DifiSinkConfig, DifiSource, DifiSourceConfig};
//!
//! let mut sink = DifiSink::new("difi_out", DifiSinkConfig::new("10.0.0.2", 50000, 1e6))?;
//! sink.work(&samples).await?;
//! sink.stop().await?;
//!
//! let mut source = DifiSource::new("difi_in", DifiSourceConfig::new(50000))?;
//! source.start().await?;
//! let status = source.work(&mut buf).await?;
//! ```

pub mod config;
pub mod error;
pub mod packet;
pub mod sample;
pub mod sink;
pub mod source;
pub mod tag;
pub mod transport;

pub use config::{SinkMode, SocketType};
pub use error::{DifiError, Result};
pub use packet::{ContextLayout, ContextPacket, DataPacket, PacketHeader, PacketKind, Timestamp};
pub use sample::{BitDepth, SampleCodec};
pub use sink::{DifiSink, DifiSinkConfig};
pub use source::{DifiSource, DifiSourceConfig};
pub use tag::{StreamTag, TagKind};
pub use transport::DifiFrameCodec;
