//! Transfer session: strategy selection and the ordered range loop.

use indicatif::ProgressBar;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};

use crate::capabilities::Capabilities;
use crate::chunks::{self, ChunkKind, ChunkSource};
use crate::connection::Connection;
use crate::error::Result;
use crate::logger::Logger;
use crate::protocol::BLOCK_SIZE;
use crate::transmit::{self, RangeOp};

/// Statistics for an upload
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadStats {
    pub bytes_sent: u64,
    pub bytes_zeroed: u64,
    pub ops: usize,
}

impl UploadStats {
    fn record(&mut self, op: &RangeOp) {
        match op {
            RangeOp::Put { length, .. } => self.bytes_sent += length,
            RangeOp::Zero { length, .. } => self.bytes_zeroed += length,
            RangeOp::Flush => {}
        }
        self.ops += 1;
    }
}

/// Turn the chunks of a `size` byte image into the ordered list of
/// requests for a server with `caps`.
///
/// Without zero support the whole image is one PUT, however sparse it is.
/// With flush support every write defers flushing and one flush follows
/// the last write.
pub fn plan(size: u64, source: &ChunkSource, caps: &Capabilities) -> Result<Vec<RangeOp>> {
    let flush = !caps.supports_flush;
    let chunks = if caps.supports_zero {
        source.chunks(size)?
    } else {
        chunks::whole(size)
    };

    let mut ops: Vec<RangeOp> = chunks
        .iter()
        .map(|c| match c.kind {
            ChunkKind::Data => RangeOp::Put { offset: c.offset, length: c.length, flush },
            ChunkKind::Hole => RangeOp::Zero { offset: c.offset, length: c.length, flush },
        })
        .collect();
    if caps.supports_flush {
        ops.push(RangeOp::Flush);
    }
    Ok(ops)
}

/// One upload over one connection. Operations run strictly in order and
/// the first failure ends the session.
pub struct TransferSession<S> {
    conn: Connection<S>,
    path: String,
    caps: Capabilities,
    block_size: usize,
    progress: Option<ProgressBar>,
}

impl<S> TransferSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn: Connection<S>, path: impl Into<String>, caps: Capabilities) -> Self {
        Self {
            conn,
            path: path.into(),
            caps,
            block_size: BLOCK_SIZE,
            progress: None,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub async fn upload<R>(
        &mut self,
        source: &mut R,
        size: u64,
        chunks: &ChunkSource,
        logger: &dyn Logger,
    ) -> Result<UploadStats>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        let ops = plan(size, chunks, &self.caps)?;
        let mut stats = UploadStats::default();
        for op in &ops {
            self.execute(op, source).await?;
            logger.range_done(op);
            stats.record(op);
        }
        Ok(stats)
    }

    async fn execute<R>(&mut self, op: &RangeOp, source: &mut R) -> Result<()>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        match *op {
            RangeOp::Put { offset, length, flush } => {
                transmit::put_range(
                    &mut self.conn,
                    &self.path,
                    source,
                    offset,
                    length,
                    flush,
                    self.block_size,
                    self.progress.as_ref(),
                )
                .await
            }
            RangeOp::Zero { offset, length, flush } => {
                transmit::patch_zero(&mut self.conn, &self.path, offset, length, flush).await?;
                if let Some(pb) = &self.progress {
                    pb.inc(length);
                }
                Ok(())
            }
            RangeOp::Flush => transmit::patch_flush(&mut self.conn, &self.path).await,
        }
    }

    pub async fn close(self) {
        self.conn.close().await;
    }
}
