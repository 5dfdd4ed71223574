//! Minimal HTTP/1.1 framing for the image transfer protocol.
//!
//! Only what the upload client needs: encoding a request head and reading
//! one response (status, headers, bounded body). Requests are sent
//! strictly one at a time on a kept-alive connection.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use crate::error::{Result, UploadError};
use crate::protocol::{MAX_BODY_SIZE, MAX_HEAD_SIZE, STATUS_NO_CONTENT};

/// Request line plus headers; the body is written separately by the caller.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: &'static str,
    path: String,
    headers: Vec<(&'static str, String)>,
}

impl RequestHead {
    pub fn new(method: &'static str, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl ToString) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn method(&self) -> &str {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn encode(&self, host: &str) -> Vec<u8> {
        let mut out = format!("{} {} HTTP/1.1\r\nhost: {}\r\n", self.method, self.path, host);
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as lossy UTF-8, for diagnostics.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// Read one final response, skipping any interim 1xx responses.
pub async fn read_response<R>(reader: &mut R) -> Result<Response>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut budget = MAX_HEAD_SIZE;
        let status_line = read_line(reader, &mut budget).await?;
        let (status, reason) = parse_status_line(&status_line)?;

        let mut headers = Vec::new();
        loop {
            let line = read_line(reader, &mut budget).await?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| UploadError::Http(format!("malformed header line: {:?}", line)))?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        if (100..200).contains(&status) {
            continue;
        }

        let mut resp = Response {
            status,
            reason,
            headers,
            body: Vec::new(),
        };
        resp.body = read_body(reader, &resp).await?;
        return Ok(resp);
    }
}

fn parse_status_line(line: &str) -> Result<(u16, String)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(UploadError::Http(format!("bad status line: {:?}", line)));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| UploadError::Http(format!("bad status code: {:?}", line)))?;
    let reason = parts.next().unwrap_or("").to_string();
    Ok((status, reason))
}

/// Read a CRLF (or bare LF) terminated line, charging it to `budget`.
async fn read_line<R>(reader: &mut R, budget: &mut usize) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(*budget as u64)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| UploadError::transport("read response", e))?;
    if n == 0 {
        return Err(UploadError::transport(
            "read response",
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before response",
            ),
        ));
    }
    if buf.last() != Some(&b'\n') {
        if n >= *budget {
            return Err(UploadError::Http(format!(
                "response head exceeds {} bytes",
                MAX_HEAD_SIZE
            )));
        }
        return Err(UploadError::Http("truncated response head".into()));
    }
    *budget -= n;
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| UploadError::Http("non UTF-8 response head".into()))
}

async fn read_body<R>(reader: &mut R, resp: &Response) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    if resp.status == STATUS_NO_CONTENT || resp.status == 304 {
        return Ok(Vec::new());
    }

    let chunked = resp
        .header("transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return read_chunked(reader).await;
    }

    if let Some(len) = resp.header("content-length") {
        let len: usize = len
            .parse()
            .map_err(|_| UploadError::Http(format!("bad content-length: {:?}", len)))?;
        if len > MAX_BODY_SIZE {
            return Err(UploadError::Http(format!(
                "response body of {} bytes exceeds {} bytes",
                len, MAX_BODY_SIZE
            )));
        }
        let mut body = vec![0u8; len];
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| UploadError::transport("read response body", e))?;
        return Ok(body);
    }

    // No framing: the body runs until the peer closes.
    read_to_close(reader).await
}

async fn read_chunked<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    let mut budget = MAX_HEAD_SIZE;
    loop {
        let line = read_line(reader, &mut budget).await?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| UploadError::Http(format!("bad chunk size: {:?}", line)))?;
        if size == 0 {
            // Trailer section ends with an empty line.
            while !read_line(reader, &mut budget).await?.is_empty() {}
            return Ok(body);
        }
        if body.len() + size > MAX_BODY_SIZE {
            return Err(UploadError::Http(format!(
                "response body exceeds {} bytes",
                MAX_BODY_SIZE
            )));
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(|e| UploadError::transport("read response body", e))?;
        if !read_line(reader, &mut budget).await?.is_empty() {
            return Err(UploadError::Http("missing CRLF after chunk".into()));
        }
    }
}

async fn read_to_close<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    (&mut *reader)
        .take(MAX_BODY_SIZE as u64 + 1)
        .read_to_end(&mut body)
        .await
        .map_err(|e| UploadError::transport("read response body", e))?;
    if body.len() > MAX_BODY_SIZE {
        return Err(UploadError::Http(format!(
            "response body exceeds {} bytes",
            MAX_BODY_SIZE
        )));
    }
    Ok(body)
}
