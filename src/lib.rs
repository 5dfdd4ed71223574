//! Image upload library
//!
//! Client side of the image transfer HTTP protocol: capability discovery,
//! sparse-aware range upload, and TLS or unix socket connections.

pub mod capabilities;
pub mod chunks;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod logger;
pub mod protocol;
pub mod session;
pub mod tls;
pub mod transmit;
pub mod upload;
pub mod url;

pub use capabilities::Capabilities;
pub use chunks::{Chunk, ChunkKind, ChunkSource};
pub use error::UploadError;
pub use session::{TransferSession, UploadStats};
pub use upload::{upload_image, UploadOptions};
