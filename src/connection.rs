//! Connection provider: TLS over TCP to the public endpoint, or a unix
//! stream socket to a same-host server.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Result, UploadError};
use crate::http::{self, RequestHead, Response};
use crate::protocol::{timeouts, UNIX_HOST};
use crate::tls;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tls { host: String, port: u16 },
    Unix(PathBuf),
}

/// Where requests go: an endpoint plus the image resource path on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    pub endpoint: Endpoint,
    pub path: String,
}

impl TransferTarget {
    pub fn tls(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Tls {
                host: host.into(),
                port,
            },
            path: path.into(),
        }
    }

    pub fn unix(socket: impl Into<PathBuf>, path: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Unix(socket.into()),
            path: path.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.endpoint, Endpoint::Unix(_))
    }

    fn describe(&self) -> String {
        match &self.endpoint {
            Endpoint::Tls { host, port } => format!("{}:{}", host, port),
            Endpoint::Unix(p) => format!("unix:{}", p.display()),
        }
    }
}

pub struct ConnectOptions {
    /// Required for TLS endpoints; unix sockets are trusted as same-host.
    pub tls: Option<Arc<rustls::ClientConfig>>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            tls: None,
            connect_timeout: Duration::from_secs(timeouts::CONNECT_SECS),
            read_timeout: Duration::from_secs(timeouts::READ_SECS),
        }
    }
}

/// A connected byte stream of either kind.
pub enum Stream {
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tls(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tls(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tls(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tls(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// One HTTP/1.1 connection. Requests are issued strictly one at a time.
pub struct Connection<S> {
    stream: BufReader<S>,
    host: String,
    read_timeout: Duration,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, host: impl Into<String>) -> Self {
        Self {
            stream: BufReader::new(stream),
            host: host.into(),
            read_timeout: Duration::from_secs(timeouts::READ_SECS),
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn encode_head(&self, head: &RequestHead) -> Vec<u8> {
        head.encode(&self.host)
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }

    /// Read the next response, giving up after the read timeout.
    pub async fn read_response(&mut self) -> Result<Response> {
        match timeout(self.read_timeout, http::read_response(&mut self.stream)).await {
            Ok(r) => r,
            Err(_) => Err(UploadError::transport(
                format!("read response from {}", self.host),
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no response within {:?}", self.read_timeout),
                ),
            )),
        }
    }

    /// Send a request with a small in-memory body and read its response.
    pub async fn request(&mut self, head: RequestHead, body: &[u8]) -> Result<Response> {
        let mut msg = self.encode_head(&head.header("content-length", body.len()));
        msg.extend_from_slice(body);
        self.write_all(&msg)
            .await
            .map_err(|e| UploadError::transport("send request", e))?;
        self.flush()
            .await
            .map_err(|e| UploadError::transport("send request", e))?;
        self.read_response().await
    }

    /// Release the connection. Shutdown errors are irrelevant at this point.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

pub async fn connect(target: &TransferTarget, opts: &ConnectOptions) -> Result<Connection<Stream>> {
    let what = target.describe();
    let res = timeout(opts.connect_timeout, connect_inner(target, opts)).await;
    match res {
        Ok(r) => r.map(|c| c.with_read_timeout(opts.read_timeout)),
        Err(_) => Err(UploadError::transport(
            format!("connect {}", what),
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out after {:?}", opts.connect_timeout),
            ),
        )),
    }
}

async fn connect_inner(target: &TransferTarget, opts: &ConnectOptions) -> Result<Connection<Stream>> {
    match &target.endpoint {
        Endpoint::Tls { host, port } => {
            let cfg = opts.tls.clone().ok_or_else(|| {
                UploadError::TlsConfig("a CA certificate is required for https endpoints".into())
            })?;
            let addr = format!("{}:{}", host, port);
            let tcp = TcpStream::connect((host.as_str(), *port))
                .await
                .map_err(|e| UploadError::transport(format!("connect {}", addr), e))?;
            let _ = tcp.set_nodelay(true);
            let name = tls::server_name_for(host)?;
            let stream = TlsConnector::from(cfg)
                .connect(name, tcp)
                .await
                .map_err(|e| UploadError::transport(format!("TLS handshake with {}", addr), e))?;
            Ok(Connection::new(Stream::Tls(Box::new(stream)), host_header(host, *port)))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path)
                .await
                .map_err(|e| UploadError::transport(format!("connect unix:{}", path.display()), e))?;
            Ok(Connection::new(Stream::Unix(stream), UNIX_HOST))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(path) => Err(UploadError::transport(
            format!("connect unix:{}", path.display()),
            io::Error::new(io::ErrorKind::Unsupported, "unix sockets not supported on this platform"),
        )),
    }
}

fn host_header(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::method;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt};

    #[test]
    fn host_header_brackets_ipv6() {
        assert_eq!(host_header("engine", 54322), "engine:54322");
        assert_eq!(host_header("::1", 443), "[::1]:443");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (client, _server) = tokio::io::duplex(64 * 1024);
        let mut conn = Connection::new(client, "engine").with_read_timeout(Duration::from_millis(50));
        let err = conn
            .request(RequestHead::new(method::OPTIONS, "/images/x"), b"")
            .await
            .unwrap_err();
        match err {
            UploadError::Transport { source, .. } => assert_eq!(source.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn tls_target_requires_ca() {
        let target = TransferTarget::tls("127.0.0.1", 1, "/images/x");
        let err = connect(&target, &ConnectOptions::default()).await.err().unwrap();
        assert!(matches!(err, UploadError::TlsConfig(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_connect_failure_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = TransferTarget::unix(dir.path().join("missing.sock"), "/images/x");
        assert!(target.is_local());
        let err = connect(&target, &ConnectOptions::default()).await.err().unwrap();
        assert!(matches!(err, UploadError::Transport { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn request_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("daemon.sock");
        let listener = tokio::net::UnixListener::bind(&sock).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut rd = tokio::io::BufReader::new(stream);
            let mut head = String::new();
            loop {
                let mut line = String::new();
                rd.read_line(&mut line).await.unwrap();
                head.push_str(&line);
                if line == "\r\n" {
                    break;
                }
            }
            let mut body = [0u8; 4];
            rd.read_exact(&mut body).await.unwrap();
            rd.get_mut()
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            (head, body)
        });

        let conn_target = TransferTarget::unix(&sock, "/images/x");
        let mut conn = connect(&conn_target, &ConnectOptions::default()).await.unwrap();
        assert_eq!(conn.host(), UNIX_HOST);
        let resp = conn
            .request(RequestHead::new(method::PATCH, "/images/x"), b"ping")
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        conn.close().await;

        let (head, body) = server.await.unwrap();
        assert!(head.starts_with("PATCH /images/x HTTP/1.1\r\nhost: localhost\r\n"));
        assert!(head.contains("content-length: 4\r\n"));
        assert_eq!(&body, b"ping");
    }
}
