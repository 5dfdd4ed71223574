//! URL parsing for https:// image endpoints

use crate::error::{Result, UploadError};
use crate::protocol::DEFAULT_HTTPS_PORT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

pub fn parse_image_url(url: &str) -> Result<ImageUrl> {
    let s_trim = url.trim();
    let lower = s_trim.to_ascii_lowercase();
    let scheme_end = lower
        .find("://")
        .ok_or_else(|| UploadError::InvalidUrl(format!("missing scheme: {}", s_trim)))?;
    if &lower[..scheme_end] != "https" {
        return Err(UploadError::InvalidUrl(format!(
            "unsupported scheme {:?}, expected https",
            &s_trim[..scheme_end]
        )));
    }
    let rest = &s_trim[scheme_end + 3..];
    let (hp, p) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    if hp.is_empty() {
        return Err(UploadError::InvalidUrl(format!("missing host: {}", s_trim)));
    }
    if p.len() <= 1 {
        return Err(UploadError::InvalidUrl(format!("missing image path: {}", s_trim)));
    }
    let (host, port) = split_host_port(hp)?;
    Ok(ImageUrl {
        host,
        port,
        path: p.to_string(),
    })
}

fn split_host_port(hp: &str) -> Result<(String, u16)> {
    // Bracketed IPv6 literal: [::1]:54322
    if let Some(inner) = hp.strip_prefix('[') {
        let (host, after) = inner
            .split_once(']')
            .ok_or_else(|| UploadError::InvalidUrl(format!("unterminated IPv6 literal: {}", hp)))?;
        let port = match after.strip_prefix(':') {
            Some(pr) => parse_port(pr)?,
            None if after.is_empty() => DEFAULT_HTTPS_PORT,
            None => return Err(UploadError::InvalidUrl(format!("bad authority: {}", hp))),
        };
        return Ok((host.to_string(), port));
    }
    match hp.rsplit_once(':') {
        Some((h, pr)) => Ok((h.to_string(), parse_port(pr)?)),
        None => Ok((hp.to_string(), DEFAULT_HTTPS_PORT)),
    }
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse()
        .map_err(|_| UploadError::InvalidUrl(format!("bad port: {:?}", s)))
}
