//! Range operations: PUT for data, PATCH for zero and flush.

use std::io::{self, SeekFrom};

use indicatif::ProgressBar;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite};

use crate::connection::Connection;
use crate::error::{Result, UploadError};
use crate::http::{RequestHead, Response};
use crate::protocol::{content_type, method, NO_FLUSH_QUERY, STATUS_OK};

/// One request against the image. `flush: false` defers durability to a
/// final [`RangeOp::Flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Put { offset: u64, length: u64, flush: bool },
    Zero { offset: u64, length: u64, flush: bool },
    Flush,
}

impl RangeOp {
    pub fn name(&self) -> &'static str {
        match self {
            RangeOp::Put { .. } => "PUT",
            RangeOp::Zero { .. } => "PATCH zero",
            RangeOp::Flush => "PATCH flush",
        }
    }

    pub fn offset(&self) -> u64 {
        match *self {
            RangeOp::Put { offset, .. } | RangeOp::Zero { offset, .. } => offset,
            RangeOp::Flush => 0,
        }
    }

    pub fn length(&self) -> u64 {
        match *self {
            RangeOp::Put { length, .. } | RangeOp::Zero { length, .. } => length,
            RangeOp::Flush => 0,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum PatchMessage {
    Zero { offset: u64, size: u64, flush: bool },
    Flush,
}

enum SendFailure {
    Socket(io::Error),
    Source(io::Error),
}

/// Errors meaning the server closed its end while we were still sending.
/// The response that follows, not the socket error, decides the outcome.
pub fn is_peer_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

fn put_path(path: &str, flush: bool) -> String {
    if flush {
        path.to_string()
    } else if path.contains('?') {
        format!("{}&{}", path, NO_FLUSH_QUERY)
    } else {
        format!("{}?{}", path, NO_FLUSH_QUERY)
    }
}

fn check_status(op: &RangeOp, resp: Response) -> Result<()> {
    if resp.status == STATUS_OK {
        return Ok(());
    }
    Err(UploadError::RangeWriteFailed {
        op: op.name(),
        offset: op.offset(),
        length: op.length(),
        status: resp.status,
        body: resp.body_text(),
    })
}

fn send_buffer_len(block_size: usize, length: u64) -> usize {
    block_size.max(1).min(usize::try_from(length).unwrap_or(usize::MAX))
}

/// Write `length` bytes of `source` starting at `offset` to the same range
/// of the image, in `block_size` units.
#[allow(clippy::too_many_arguments)]
pub async fn put_range<S, R>(
    conn: &mut Connection<S>,
    path: &str,
    source: &mut R,
    offset: u64,
    length: u64,
    flush: bool,
    block_size: usize,
    progress: Option<&ProgressBar>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncSeek + Unpin,
{
    let op = RangeOp::Put { offset, length, flush };
    if length == 0 {
        return Ok(());
    }
    let head = RequestHead::new(method::PUT, put_path(path, flush))
        .header("content-type", content_type::OCTET_STREAM)
        .header("content-length", length)
        .header("content-range", format!("bytes {}-{}/*", offset, offset + length - 1));
    let head = conn.encode_head(&head);

    source.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; send_buffer_len(block_size, length)];

    let sent: std::result::Result<(), SendFailure> = async {
        conn.write_all(&head).await.map_err(SendFailure::Socket)?;
        let mut remaining = length;
        while remaining > 0 {
            let n = remaining.min(buf.len() as u64) as usize;
            source.read_exact(&mut buf[..n]).await.map_err(SendFailure::Source)?;
            conn.write_all(&buf[..n]).await.map_err(SendFailure::Socket)?;
            remaining -= n as u64;
            if let Some(pb) = progress {
                pb.inc(n as u64);
            }
        }
        conn.flush().await.map_err(SendFailure::Socket)
    }
    .await;

    match sent {
        Ok(()) => {}
        // Server rejected the request early; its response says why.
        Err(SendFailure::Socket(e)) if is_peer_closed(&e) => {}
        Err(SendFailure::Socket(e)) => {
            return Err(UploadError::transport(
                format!("send PUT offset={} length={}", offset, length),
                e,
            ))
        }
        Err(SendFailure::Source(e)) => return Err(UploadError::Io(e)),
    }

    let resp = conn.read_response().await?;
    check_status(&op, resp)
}

async fn send_patch<S>(conn: &mut Connection<S>, path: &str, op: RangeOp, msg: &PatchMessage) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(msg).map_err(|e| UploadError::Io(e.into()))?;
    let head = RequestHead::new(method::PATCH, path)
        .header("content-type", content_type::JSON)
        .header("content-length", body.len());
    let mut req = conn.encode_head(&head);
    req.extend_from_slice(&body);

    let sent = async {
        conn.write_all(&req).await?;
        conn.flush().await
    }
    .await;
    match sent {
        Ok(()) => {}
        Err(e) if is_peer_closed(&e) => {}
        Err(e) => return Err(UploadError::transport(format!("send {}", op.name()), e)),
    }

    let resp = conn.read_response().await?;
    check_status(&op, resp)
}

/// Zero `length` bytes at `offset` on the server. Nothing is read locally.
pub async fn patch_zero<S>(conn: &mut Connection<S>, path: &str, offset: u64, length: u64, flush: bool) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let op = RangeOp::Zero { offset, length, flush };
    send_patch(conn, path, op, &PatchMessage::Zero { offset, size: length, flush }).await
}

pub async fn patch_flush<S>(conn: &mut Connection<S>, path: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send_patch(conn, path, RangeOp::Flush, &PatchMessage::Flush).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    struct Captured {
        head: String,
        body: Vec<u8>,
    }

    /// Read one request (head plus content-length body) from the server side.
    async fn read_request(rd: &mut BufReader<DuplexStream>) -> Captured {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            rd.read_line(&mut line).await.unwrap();
            head.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }
        let len: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length: "))
            .unwrap()
            .parse()
            .unwrap();
        let mut body = vec![0u8; len];
        rd.read_exact(&mut body).await.unwrap();
        Captured { head, body }
    }

    fn pair() -> (Connection<DuplexStream>, BufReader<DuplexStream>) {
        let (client, server) = tokio::io::duplex(1024 * 1024);
        (Connection::new(client, "engine:54322"), BufReader::new(server))
    }

    #[test]
    fn flush_query() {
        assert_eq!(put_path("/images/x", true), "/images/x");
        assert_eq!(put_path("/images/x", false), "/images/x?flush=n");
        assert_eq!(put_path("/images/x?a=1", false), "/images/x?a=1&flush=n");
    }

    #[test]
    fn send_buffer_never_exceeds_block_or_range() {
        assert_eq!(send_buffer_len(1024, 100), 100);
        assert_eq!(send_buffer_len(1024, 4096), 1024);
        assert_eq!(send_buffer_len(0, 4096), 1);
        // Ranges of 4 GiB and more must still get a full block.
        assert_eq!(send_buffer_len(131072, 4 << 30), 131072);
        assert_eq!(send_buffer_len(131072, u64::MAX), 131072);
    }

    #[test]
    fn patch_messages() {
        let zero = serde_json::to_value(PatchMessage::Zero { offset: 10, size: 20, flush: false }).unwrap();
        assert_eq!(zero, serde_json::json!({"op": "zero", "offset": 10, "size": 20, "flush": false}));
        let flush = serde_json::to_value(PatchMessage::Flush).unwrap();
        assert_eq!(flush, serde_json::json!({"op": "flush"}));
    }

    #[tokio::test]
    async fn put_streams_range_in_blocks() {
        let (mut conn, mut srv) = pair();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut source = Cursor::new(data.clone());

        let server = tokio::spawn(async move {
            let req = read_request(&mut srv).await;
            srv.get_mut()
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            req
        });

        put_range(&mut conn, "/images/x", &mut source, 1000, 5000, false, 512, None)
            .await
            .unwrap();

        let req = server.await.unwrap();
        assert!(req.head.starts_with("PUT /images/x?flush=n HTTP/1.1\r\n"));
        assert!(req.head.contains("content-type: application/octet-stream\r\n"));
        assert!(req.head.contains("content-length: 5000\r\n"));
        assert!(req.head.contains("content-range: bytes 1000-5999/*\r\n"));
        assert_eq!(req.body, &data[1000..6000]);
    }

    #[tokio::test]
    async fn put_failure_carries_status_and_body() {
        let (mut conn, mut srv) = pair();
        let mut source = Cursor::new(vec![7u8; 64]);
        let server = tokio::spawn(async move {
            read_request(&mut srv).await;
            srv.get_mut()
                .write_all(b"HTTP/1.1 507 Insufficient Storage\r\ncontent-length: 4\r\n\r\nfull")
                .await
                .unwrap();
        });

        let err = put_range(&mut conn, "/images/x", &mut source, 0, 64, true, 16, None)
            .await
            .unwrap_err();
        server.await.unwrap();
        match err {
            UploadError::RangeWriteFailed { op, offset, length, status, body } => {
                assert_eq!((op, offset, length, status), ("PUT", 0, 64, 507));
                assert_eq!(body, "full");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn redirect_is_failure() {
        let (mut conn, mut srv) = pair();
        let server = tokio::spawn(async move {
            read_request(&mut srv).await;
            srv.get_mut()
                .write_all(b"HTTP/1.1 307 Temporary Redirect\r\nlocation: /elsewhere\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
        });
        let err = patch_flush(&mut conn, "/images/x").await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, UploadError::RangeWriteFailed { status: 307, op: "PATCH flush", .. }));
    }

    #[tokio::test]
    async fn flush_without_reply_times_out() {
        let (client, _srv) = tokio::io::duplex(64 * 1024);
        let mut conn = Connection::new(client, "engine").with_read_timeout(std::time::Duration::from_millis(50));
        let err = patch_flush(&mut conn, "/images/x").await.unwrap_err();
        match err {
            UploadError::Transport { source, .. } => assert_eq!(source.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn patch_zero_sends_json() {
        let (mut conn, mut srv) = pair();
        let server = tokio::spawn(async move {
            let req = read_request(&mut srv).await;
            srv.get_mut()
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            req
        });
        patch_zero(&mut conn, "/images/x", 4096, 8192, false).await.unwrap();
        let req = server.await.unwrap();
        assert!(req.head.starts_with("PATCH /images/x HTTP/1.1\r\n"));
        assert!(req.head.contains("content-type: application/json\r\n"));
        let msg: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(msg, serde_json::json!({"op": "zero", "offset": 4096, "size": 8192, "flush": false}));
    }

    /// A stream that accepts `accept` body bytes, then fails writes with
    /// `kind`, while serving a canned response to reads.
    struct ClosingPeer {
        accept: usize,
        kind: io::ErrorKind,
        response: Cursor<Vec<u8>>,
    }

    impl AsyncRead for ClosingPeer {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::pin::Pin::new(&mut self.response).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for ClosingPeer {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            if self.accept == 0 {
                return std::task::Poll::Ready(Err(io::Error::from(self.kind)));
            }
            let n = buf.len().min(self.accept);
            self.accept -= n;
            std::task::Poll::Ready(Ok(n))
        }

        fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    fn closing_peer(kind: io::ErrorKind, response: &[u8]) -> Connection<ClosingPeer> {
        Connection::new(
            ClosingPeer { accept: 300, kind, response: Cursor::new(response.to_vec()) },
            "engine",
        )
    }

    #[tokio::test]
    async fn peer_close_then_ok_is_success() {
        let mut conn = closing_peer(io::ErrorKind::BrokenPipe, b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
        let mut source = Cursor::new(vec![1u8; 4096]);
        put_range(&mut conn, "/images/x", &mut source, 0, 4096, true, 256, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn peer_close_then_error_reports_status() {
        let mut conn = closing_peer(
            io::ErrorKind::ConnectionReset,
            b"HTTP/1.1 403 Forbidden\r\ncontent-length: 7\r\n\r\nexpired",
        );
        let mut source = Cursor::new(vec![1u8; 4096]);
        let err = put_range(&mut conn, "/images/x", &mut source, 0, 4096, true, 256, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::RangeWriteFailed { status: 403, .. }));
    }

    #[tokio::test]
    async fn other_socket_errors_are_fatal() {
        let mut conn = closing_peer(io::ErrorKind::PermissionDenied, b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
        let mut source = Cursor::new(vec![1u8; 4096]);
        let err = put_range(&mut conn, "/images/x", &mut source, 0, 4096, true, 256, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transport { .. }));
    }

    #[tokio::test]
    async fn short_source_is_io_error() {
        let (mut conn, _srv) = pair();
        let mut source = Cursor::new(vec![1u8; 100]);
        let err = put_range(&mut conn, "/images/x", &mut source, 0, 200, true, 64, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
    }
}
