//! Capability discovery via OPTIONS.

use std::path::PathBuf;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::Connection;
use crate::error::{Result, UploadError};
use crate::http::RequestHead;
use crate::logger::Logger;
use crate::protocol::{feature, method, STATUS_METHOD_NOT_ALLOWED, STATUS_NO_CONTENT, STATUS_OK};

/// Optional server operations, learned once per upload and read-only after.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_zero: bool,
    pub supports_flush: bool,
    /// Same-host socket the server accepts requests on, if any.
    pub unix_socket: Option<PathBuf>,
}

#[derive(Deserialize)]
struct OptionsBody {
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    unix_socket: Option<PathBuf>,
}

pub fn parse_options_body(body: &[u8]) -> serde_json::Result<Capabilities> {
    let opts: OptionsBody = serde_json::from_slice(body)?;
    Ok(Capabilities {
        supports_zero: opts.features.iter().any(|f| f == feature::ZERO),
        supports_flush: opts.features.iter().any(|f| f == feature::FLUSH),
        unix_socket: opts.unix_socket.filter(|p| !p.as_os_str().is_empty()),
    })
}

/// Ask the server which optional operations it supports for `path`.
///
/// A server that does not implement OPTIONS, answers without a body, or
/// sends an unparsable body supports nothing optional. Any other non-200
/// status aborts the upload.
pub async fn negotiate<S>(conn: &mut Connection<S>, path: &str, logger: &dyn Logger) -> Result<Capabilities>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let resp = conn.request(RequestHead::new(method::OPTIONS, path), &[]).await?;
    let caps = match resp.status {
        STATUS_METHOD_NOT_ALLOWED => Capabilities::default(),
        STATUS_OK | STATUS_NO_CONTENT if resp.body.is_empty() => Capabilities::default(),
        STATUS_OK => match parse_options_body(&resp.body) {
            Ok(caps) => caps,
            Err(e) => {
                logger.warn("options", &format!("ignoring malformed capabilities: {}", e));
                Capabilities::default()
            }
        },
        status => {
            return Err(UploadError::NegotiationFailed {
                status,
                body: resp.body_text(),
            })
        }
    };
    logger.negotiated(&caps);
    Ok(caps)
}
