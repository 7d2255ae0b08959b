//! Command handlers for radioctl
//!
//! - Transfer: sample files to and from blobs
//! - Secret: named secrets for flowgraph parameters
//! - Serve: the control plane

pub mod secret;
pub mod serve;
pub mod transfer;

pub use secret::SecretArgs;
pub use serve::ServeArgs;
pub use transfer::{AuthArgs, DownloadArgs, UploadArgs};
