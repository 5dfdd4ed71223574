//! Upload orchestration: negotiate over the public endpoint, keep that
//! connection or switch to a local socket, then run one transfer session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;

use crate::capabilities::{self, Capabilities};
use crate::chunks::{self, ChunkSource, DEFAULT_MAP_COMMAND};
use crate::connection::{self, ConnectOptions, TransferTarget};
use crate::error::{Result, UploadError};
use crate::logger::Logger;
use crate::protocol::{timeouts, BLOCK_SIZE};
use crate::session::{TransferSession, UploadStats};
use crate::tls;
use crate::url::parse_image_url;

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub source: PathBuf,
    pub url: String,
    /// Trust root for the public https endpoint.
    pub ca_file: Option<PathBuf>,
    pub block_size: usize,
    /// Switch to the server's unix socket when it advertises one.
    pub use_unix_socket: bool,
    pub map_command: Vec<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl UploadOptions {
    pub fn new(source: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
            ca_file: None,
            block_size: BLOCK_SIZE,
            use_unix_socket: true,
            map_command: DEFAULT_MAP_COMMAND.iter().map(|s| s.to_string()).collect(),
            connect_timeout: Duration::from_secs(timeouts::CONNECT_SECS),
            read_timeout: Duration::from_secs(timeouts::READ_SECS),
        }
    }
}

/// Pick the connection used for the transfer. Only ever moves from the
/// public endpoint to a local socket, never the other way.
pub fn transfer_target(public: &TransferTarget, caps: &Capabilities, use_unix_socket: bool) -> TransferTarget {
    match &caps.unix_socket {
        Some(sock) if use_unix_socket && !public.is_local() => TransferTarget::unix(sock, public.path.clone()),
        _ => public.clone(),
    }
}

pub async fn upload_image(
    opts: &UploadOptions,
    progress: Option<&ProgressBar>,
    logger: &dyn Logger,
) -> Result<UploadStats> {
    let started = Instant::now();
    let url = parse_image_url(&opts.url)?;
    let mut file = tokio::fs::File::open(&opts.source).await?;
    let size = file.metadata().await?.len();
    logger.start(&opts.source, &opts.url, size);

    let ca_file = opts.ca_file.as_deref().ok_or_else(|| {
        UploadError::TlsConfig("a CA certificate file is required for https endpoints".into())
    })?;
    let connect_opts = ConnectOptions {
        tls: Some(Arc::new(tls::build_client_config(ca_file)?)),
        connect_timeout: opts.connect_timeout,
        read_timeout: opts.read_timeout,
    };
    let public = TransferTarget::tls(url.host, url.port, url.path);

    let mut conn = connection::connect(&public, &connect_opts).await?;
    let caps = match capabilities::negotiate(&mut conn, &public.path, logger).await {
        Ok(caps) => caps,
        Err(e) => {
            conn.close().await;
            return Err(e);
        }
    };

    // The allocation map only matters when holes can be zeroed remotely.
    let source_map = if caps.supports_zero {
        match chunks::map_image(&opts.map_command, &opts.source).await {
            Ok(map) => ChunkSource::Map(map),
            Err(e) => {
                conn.close().await;
                return Err(e);
            }
        }
    } else {
        ChunkSource::Whole
    };

    // Stay on the negotiation connection unless switching to the local socket.
    let target = transfer_target(&public, &caps, opts.use_unix_socket);
    let conn = if target == public {
        conn
    } else {
        conn.close().await;
        connection::connect(&target, &connect_opts).await?
    };

    let mut session = TransferSession::new(conn, target.path.clone(), caps).with_block_size(opts.block_size);
    if let Some(pb) = progress {
        pb.set_length(size);
        session = session.with_progress(pb.clone());
    }
    let res = session.upload(&mut file, size, &source_map, logger).await;
    session.close().await;

    let stats = res?;
    logger.done(stats.bytes_sent, started.elapsed().as_secs_f64());
    Ok(stats)
}
