//! CloudRadio Core
//!
//! The buffering layer that sits between a real-time sample stream and a
//! chunked, network-backed object store.
//!
//! ## What lives here?
//!
//! Everything that has invariants worth testing without a network:
//!
//! 1. **Upload windows**: fixed-size sample windows filled across work calls
//!    and handed off whole to a bounded queue ([`UploadWindow`])
//! 2. **Chunk reassembly**: turning arbitrarily sized network chunks back into
//!    whole items, carrying partial-item bytes forward ([`ChunkReassembler`])
//! 3. **Read buffers**: serving whole items to pull-style work calls
//!    ([`ReadBuffer`])
//! 4. **Hand-off queue**: the bounded FIFO between the buffering side and the
//!    transfer side ([`queue::bounded`])
//! 5. **Block lifecycle**: `Uninitialized -> Validated -> Streaming -> Closed`
//!    ([`Lifecycle`])
//!
//! ## Data Flow
//!
//! ```text
//!  work(input) ──► UploadWindow ──► HandoffQueue ──► stage_block(id, bytes)
//!                                                        │
//!                                                  commit_block_list(ids)
//!
//!  download chunks ──► ChunkReassembler ──► HandoffQueue ──► ReadBuffer ──► work(output)
//! ```
//!
//! Nothing in this crate talks to the network. The blob crate plugs a
//! `BlockBlobClient` into the ends of these pipelines.

pub mod block;
pub mod error;
pub mod item;
pub mod message;
pub mod pipeline;
pub mod queue;
pub mod read_buffer;
pub mod reassembly;
pub mod state;
pub mod window;

pub use block::{SinkBlock, SourceBlock, WorkStatus};
pub use error::{Error, Result};
pub use item::{ItemFormat, ItemSpec};
pub use message::Message;
pub use pipeline::{drive_sink, drive_source, PipelineStats};
pub use queue::{bounded, QueueReceiver, QueueSender, TryPush};
pub use read_buffer::ReadBuffer;
pub use reassembly::{reassemble, ChunkReassembler};
pub use state::{BlockState, Lifecycle};
pub use window::{Enqueue, UploadWindow};
