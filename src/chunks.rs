//! Chunk sources: where the byte ranges of an upload come from.
//!
//! A dumb upload sends the whole file as one data range. A sparse upload
//! uses the allocation map produced by an external tool (by default
//! `qemu-img map --output json`), so holes can be zeroed on the server
//! instead of being read and transmitted.

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::{Result, UploadError};

pub const DEFAULT_MAP_COMMAND: &[&str] = &["qemu-img", "map", "--output", "json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Data,
    Hole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub length: u64,
    pub kind: ChunkKind,
}

impl Chunk {
    pub fn data(offset: u64, length: u64) -> Self {
        Self { offset, length, kind: ChunkKind::Data }
    }

    pub fn hole(offset: u64, length: u64) -> Self {
        Self { offset, length, kind: ChunkKind::Hole }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkSource {
    /// The whole file as one data range.
    Whole,
    /// An allocation map covering the file.
    Map(Vec<Chunk>),
}

impl ChunkSource {
    /// The chunks to transfer for a file of `size` bytes.
    pub fn chunks(&self, size: u64) -> Result<Vec<Chunk>> {
        match self {
            ChunkSource::Whole => Ok(whole(size)),
            ChunkSource::Map(chunks) => {
                validate(chunks, size)?;
                Ok(chunks.clone())
            }
        }
    }
}

pub fn whole(size: u64) -> Vec<Chunk> {
    if size == 0 {
        Vec::new()
    } else {
        vec![Chunk::data(0, size)]
    }
}

#[derive(Deserialize)]
struct MapEntry {
    start: u64,
    length: u64,
    data: bool,
}

/// Parse a JSON allocation map. Empty entries are dropped and adjacent
/// entries of the same kind are merged.
pub fn parse_map(json: &[u8]) -> Result<Vec<Chunk>> {
    let entries: Vec<MapEntry> = serde_json::from_slice(json)
        .map_err(|e| UploadError::InvalidChunkMap(format!("bad map JSON: {}", e)))?;

    let mut chunks: Vec<Chunk> = Vec::with_capacity(entries.len());
    for e in entries.into_iter().filter(|e| e.length > 0) {
        let kind = if e.data { ChunkKind::Data } else { ChunkKind::Hole };
        match chunks.last_mut() {
            Some(last) if last.kind == kind && last.end() == e.start => last.length += e.length,
            _ => chunks.push(Chunk { offset: e.start, length: e.length, kind }),
        }
    }
    Ok(chunks)
}

/// Check that `chunks` are ordered, non-empty, and cover exactly `[0, size)`.
pub fn validate(chunks: &[Chunk], size: u64) -> Result<()> {
    let mut pos = 0u64;
    for c in chunks {
        if c.length == 0 {
            return Err(UploadError::InvalidChunkMap(format!("empty chunk at offset {}", c.offset)));
        }
        if c.offset != pos {
            return Err(UploadError::InvalidChunkMap(format!(
                "chunk at offset {} but previous range ended at {}",
                c.offset, pos
            )));
        }
        pos = c
            .offset
            .checked_add(c.length)
            .ok_or_else(|| UploadError::InvalidChunkMap(format!("chunk at offset {} overflows", c.offset)))?;
    }
    if pos != size {
        return Err(UploadError::InvalidChunkMap(format!(
            "map covers {} bytes, image has {} bytes",
            pos, size
        )));
    }
    Ok(())
}

/// Run the sparse map producer on `path` and parse its output.
///
/// The image path is appended as the last argument of `command`.
pub async fn map_image(command: &[String], path: &Path) -> Result<Vec<Chunk>> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| UploadError::MapFailed("empty map command".into()))?;
    let out = Command::new(program)
        .args(args)
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| UploadError::MapFailed(format!("spawn {}: {}", program, e)))?;
    if !out.status.success() {
        return Err(UploadError::MapFailed(format!(
            "{} exited with {}: {}",
            program,
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    parse_map(&out.stdout)
}
