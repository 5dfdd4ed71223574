use std::fs;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::RootCertStore;

use crate::error::{Result, UploadError};

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") { return PathBuf::from(appdata).join("ImageUpload"); }
    }
    // Unix-like default
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("image-upload");
    }
    PathBuf::from(".image-upload")
}

/// Load every certificate in a PEM bundle into a trust store.
pub fn load_ca_roots(path: &Path) -> Result<RootCertStore> {
    let f = fs::File::open(path)
        .map_err(|e| UploadError::TlsConfig(format!("open CA file {}: {}", path.display(), e)))?;
    let mut rd = BufReader::new(f);
    let mut roots = RootCertStore::empty();
    for c in rustls_pemfile::certs(&mut rd) {
        let c: CertificateDer<'static> = c
            .map_err(|e| UploadError::TlsConfig(format!("read CA file {}: {}", path.display(), e)))?;
        roots
            .add(c)
            .map_err(|e| UploadError::TlsConfig(format!("bad CA certificate in {}: {}", path.display(), e)))?;
    }
    if roots.is_empty() {
        return Err(UploadError::TlsConfig(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(roots)
}

/// Client config that verifies the server against the given trust root.
pub fn build_client_config(ca_file: &Path) -> Result<rustls::ClientConfig> {
    let roots = load_ca_roots(ca_file)?;
    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

pub fn server_name_for(host: &str) -> Result<ServerName<'static>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ServerName::IpAddress(ip.into()));
    }
    ServerName::try_from(host.to_string())
        .map_err(|_| UploadError::TlsConfig(format!("invalid server name: {:?}", host)))
}
