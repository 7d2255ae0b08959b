//! Error Types for the buffering core
//!
//! ## Error Categories
//!
//! - `Config`: invalid sizes, unknown item formats, zero-capacity queues
//! - `PartialItem`: a byte slice handed to a work call that does not hold a
//!   whole number of items
//! - `InvalidTransition`: a lifecycle step that is not allowed from the
//!   current state (e.g. `work` after `stop`)
//! - `QueueClosed`: the other end of a hand-off queue went away
//! - `Message`: a flowgraph message could not be converted to/from JSON
//! - `Io`: reader/writer failures in the pipeline driver

use thiserror::Error;

use crate::state::BlockState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{len} bytes is not a whole number of {item_size}-byte items")]
    PartialItem { len: usize, item_size: usize },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: BlockState, to: BlockState },

    #[error("Hand-off queue closed")]
    QueueClosed,

    #[error("Message error: {0}")]
    Message(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Message(e.to_string())
    }
}
