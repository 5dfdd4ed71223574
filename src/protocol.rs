//! Shared wire constants for the image transfer HTTP protocol

// Send unit for PUT bodies. Tuning only; any positive value is correct.
pub const BLOCK_SIZE: usize = 128 * 1024;

// The only status treated as success for PUT, PATCH and OPTIONS
pub const STATUS_OK: u16 = 200;
pub const STATUS_NO_CONTENT: u16 = 204;
pub const STATUS_METHOD_NOT_ALLOWED: u16 = 405;

// Upper bounds on what we accept from the peer
pub const MAX_HEAD_SIZE: usize = 64 * 1024;
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

// Query appended to PUT paths when the session flushes once at the end
pub const NO_FLUSH_QUERY: &str = "flush=n";

// Host header used for same-host unix socket connections
pub const UNIX_HOST: &str = "localhost";

pub const DEFAULT_HTTPS_PORT: u16 = 443;

pub mod method {
    pub const OPTIONS: &str = "OPTIONS";
    pub const PUT: &str = "PUT";
    pub const PATCH: &str = "PATCH";
}

// Optional server operations advertised by OPTIONS
pub mod feature {
    pub const ZERO: &str = "zero";
    pub const FLUSH: &str = "flush";
}

pub mod content_type {
    pub const OCTET_STREAM: &str = "application/octet-stream";
    pub const JSON: &str = "application/json";
}

pub mod timeouts {
    // Connection establishment timeout, including the TLS handshake (s)
    pub const CONNECT_SECS: u64 = 10;
    // Wait for a response head and body after the request is sent (s)
    pub const READ_SECS: u64 = 60;
}
