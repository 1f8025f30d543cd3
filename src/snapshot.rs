//! Two-part tank persistence record
//!
//! Each tank saves under a shared name prefix:
//!
//! ```text
//! <name>.vec    binary vector snapshot (live rows only)
//! <name>.meta   serialized registry image (mapping + params + next key)
//! ```
//!
//! # .vec layout
//!
//! ```text
//! Offset   Size    Type        Description
//! ─────────────────────────────────────────────
//! 0x00     8       [u8; 8]     Magic: "TANKVEC1"
//! 0x08     4       u32 LE      D: dimensions
//! 0x0C     8       u64 LE      N: live row count
//! 0x14     44      [u8; 44]    Reserved
//! 0x40     N*D*4   [f32] LE    Row-major vector data
//! ```
//!
//! Both parts must exist for a restore; a partial pair is treated as no
//! snapshot at all.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, TankError};
use crate::registry::RegistryImage;

/// Magic bytes identifying a .vec snapshot.
pub const MAGIC: [u8; 8] = *b"TANKVEC1";

pub const HEADER_SIZE: usize = 64;

pub const VECTOR_EXT: &str = "vec";
pub const META_EXT: &str = "meta";

pub fn vector_path(dir: &Path, tank_name: &str) -> PathBuf {
    dir.join(format!("{tank_name}.{VECTOR_EXT}"))
}

pub fn metadata_path(dir: &Path, tank_name: &str) -> PathBuf {
    dir.join(format!("{tank_name}.{META_EXT}"))
}

/// True only when both parts of the record are present.
pub fn record_exists(dir: &Path, tank_name: &str) -> bool {
    vector_path(dir, tank_name).exists() && metadata_path(dir, tank_name).exists()
}

/// Parsed .vec snapshot header.
#[derive(Debug, Clone, Copy)]
pub struct VecHeader {
    pub dim: u32,
    pub count: u64,
}

impl VecHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(TankError::Format("file too small for header".into()));
        }
        if bytes[0..8] != MAGIC {
            return Err(TankError::Format("invalid magic bytes".into()));
        }
        let dim = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let count = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
        Ok(Self { dim, count })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.dim.to_le_bytes());
        buf[12..20].copy_from_slice(&self.count.to_le_bytes());
        buf
    }
}

/// Write the live rows of a tank as a .vec snapshot.
pub fn write_vectors(path: &Path, dim: usize, rows: &[f32]) -> Result<()> {
    debug_assert_eq!(rows.len() % dim.max(1), 0);
    let header = VecHeader {
        dim: dim as u32,
        count: (rows.len() / dim.max(1)) as u64,
    };

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&header.to_bytes())?;
    for value in rows {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a .vec snapshot back as (dim, row-major data).
pub fn read_vectors(path: &Path) -> Result<(usize, Vec<f32>)> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let header = VecHeader::from_bytes(&bytes)?;

    // header fields are untrusted: size the payload with checked arithmetic
    let expected = header
        .count
        .checked_mul(header.dim as u64)
        .and_then(|n| n.checked_mul(std::mem::size_of::<f32>() as u64))
        .and_then(|n| n.checked_add(HEADER_SIZE as u64))
        .ok_or_else(|| {
            TankError::Format(format!(
                "implausible snapshot shape: dim {}, count {}",
                header.dim, header.count
            ))
        })?;
    if (bytes.len() as u64) < expected {
        return Err(TankError::Format(format!(
            "snapshot truncated: expected {} bytes, got {}",
            expected,
            bytes.len()
        )));
    }
    let expected = expected as usize;

    let dim = header.dim as usize;

    let data = bytes[HEADER_SIZE..expected]
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    Ok((dim, data))
}

/// Write the metadata part of the record.
pub fn write_metadata(path: &Path, image: &RegistryImage) -> Result<()> {
    let bytes = serde_json::to_vec(image)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Read the metadata part of the record.
pub fn read_metadata(path: &Path) -> Result<RegistryImage> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Scan a persistence directory for complete records, returning tank names.
pub fn scan_records(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(VECTOR_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if record_exists(dir, stem) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}
