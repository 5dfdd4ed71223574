//! Error types for the upload client.

use std::io;

/// Errors produced while negotiating with or uploading to an image endpoint.
///
/// Every variant is fatal for the current upload. Malformed capability
/// payloads are not represented here: they degrade to an empty
/// [`Capabilities`](crate::capabilities::Capabilities) instead.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("capability discovery failed: HTTP {status}: {body}")]
    NegotiationFailed { status: u16, body: String },

    #[error("transport error ({context}): {source}")]
    Transport {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{op} failed at offset {offset} length {length}: HTTP {status}: {body}")]
    RangeWriteFailed {
        op: &'static str,
        offset: u64,
        length: u64,
        status: u16,
        body: String,
    },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid chunk map: {0}")]
    InvalidChunkMap(String),

    #[error("sparse map command failed: {0}")]
    MapFailed(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("malformed HTTP response: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl UploadError {
    pub(crate) fn transport(context: impl Into<String>, source: io::Error) -> Self {
        UploadError::Transport {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
