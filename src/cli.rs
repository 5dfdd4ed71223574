//! Command-line arguments and their merge with file defaults

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::FileConfig;
use crate::upload::UploadOptions;

/// Command-line arguments
#[derive(Clone, Debug, Parser)]
#[command(
    author,
    version,
    about = "Upload a disk image to an image transfer endpoint, skipping holes when the server supports it"
)]
pub struct Args {
    /// Image file to upload
    pub source: PathBuf,

    /// Destination (https://host:port/images/<ticket>)
    pub url: String,

    /// CA certificate (PEM) used to verify the server
    #[arg(long = "ca-file")]
    pub ca_file: Option<PathBuf>,

    /// Send unit for data ranges, in bytes
    #[arg(long = "buffer-size")]
    pub buffer_size: Option<usize>,

    /// Never switch to the server's local unix socket
    #[arg(long = "no-unix-socket")]
    pub no_unix_socket: bool,

    /// Sparse map command; the image path is appended (default: qemu-img map --output json)
    #[arg(long = "map-command", value_delimiter = ' ')]
    pub map_command: Option<Vec<String>>,

    /// Connection timeout in seconds
    #[arg(long = "connect-timeout")]
    pub connect_timeout: Option<u64>,

    /// Seconds to wait for each server response
    #[arg(long = "read-timeout")]
    pub read_timeout: Option<u64>,

    /// Config file (default: ~/.config/image-upload/upload.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Append a timestamped event log to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Show upload settings before starting
    #[arg(short, long)]
    pub verbose: bool,

    /// Show a progress bar
    #[arg(short, long)]
    pub progress: bool,
}

impl Args {
    /// Command-line values win over file values, file values over defaults.
    pub fn to_options(&self, file: &FileConfig) -> UploadOptions {
        let mut opts = UploadOptions::new(&self.source, &self.url);
        opts.ca_file = self.ca_file.clone().or_else(|| file.ca_file.clone());
        if let Some(n) = self.buffer_size.or(file.buffer_size) {
            opts.block_size = n.max(1);
        }
        opts.use_unix_socket = !self.no_unix_socket && file.use_unix_socket.unwrap_or(true);
        if let Some(cmd) = self.map_command.clone().or_else(|| file.map_command.clone()) {
            opts.map_command = cmd;
        }
        if let Some(secs) = self.connect_timeout.or(file.connect_timeout_secs) {
            opts.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.read_timeout.or(file.read_timeout_secs) {
            opts.read_timeout = Duration::from_secs(secs);
        }
        opts
    }
}
