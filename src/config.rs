//! Optional TOML defaults, read from `upload.toml` in the config directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::tls;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub ca_file: Option<PathBuf>,
    pub buffer_size: Option<usize>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub map_command: Option<Vec<String>>,
    pub use_unix_socket: Option<bool>,
}

pub fn config_path() -> PathBuf {
    tls::config_dir().join("upload.toml")
}

/// Load `explicit` if given (it must exist), else the default file if present.
pub fn load_config(explicit: Option<&Path>) -> Result<FileConfig> {
    let p = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let p = config_path();
            if !p.exists() {
                return Ok(FileConfig::default());
            }
            p
        }
    };
    let data = std::fs::read_to_string(&p).with_context(|| format!("read config {}", p.display()))?;
    let cfg: FileConfig = toml::from_str(&data).with_context(|| format!("parse config {}", p.display()))?;
    Ok(cfg)
}
