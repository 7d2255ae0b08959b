//! Error types for the DIFI blocks.
//!
//! - `Config`: bad bit depth, packet size, socket type or address
//! - `Malformed`: a received packet too short or inconsistent to decode
//! - `BitDepthMismatch`: a context packet announces a sample width other than
//!   the one the source was configured for
//! - `Io`: socket failures

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DifiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Context packet carries {announced}-bit samples, block expects {configured}-bit")]
    BitDepthMismatch { announced: u32, configured: u32 },

    #[error("Short send: {sent} of {len} bytes")]
    ShortSend { sent: usize, len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] cloudradio_core::Error),
}

pub type Result<T> = std::result::Result<T, DifiError>;

impl DifiError {
    /// Errors that leave the socket usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DifiError::Malformed(_)
                | DifiError::Core(cloudradio_core::Error::PartialItem { .. })
        )
    }
}
