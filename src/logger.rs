use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::capabilities::Capabilities;
use crate::transmit::RangeOp;

pub trait Logger: Send + Sync {
    fn start(&self, _src: &Path, _url: &str, _size: u64) {}
    fn negotiated(&self, _caps: &Capabilities) {}
    fn range_done(&self, _op: &RangeOp) {}
    fn warn(&self, _context: &str, _msg: &str) {}
    fn error(&self, _context: &str, _msg: &str) {}
    fn done(&self, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn start(&self, src: &Path, url: &str, size: u64) {
        self.line(&format!("START src={} url={} size={}", src.display(), url, size));
    }
    fn negotiated(&self, caps: &Capabilities) {
        self.line(&format!(
            "OPTIONS zero={} flush={} unix_socket={}",
            caps.supports_zero,
            caps.supports_flush,
            caps.unix_socket
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".into())
        ));
    }
    fn range_done(&self, op: &RangeOp) {
        match op {
            RangeOp::Flush => self.line("FLUSH"),
            RangeOp::Put { offset, length, flush } => self.line(&format!(
                "PUT offset={offset} length={length} flush={flush}"
            )),
            RangeOp::Zero { offset, length, flush } => self.line(&format!(
                "ZERO offset={offset} length={length} flush={flush}"
            )),
        }
    }
    fn warn(&self, context: &str, msg: &str) {
        self.line(&format!("WARN ctx={} msg={}", context, msg));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
    fn done(&self, bytes: u64, seconds: f64) {
        self.line(&format!("DONE bytes={bytes} seconds={seconds:.3}"));
    }
}
