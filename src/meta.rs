// SPDX-License-Identifier: AGPL-3.0-or-later
// StrataDB - Columnar Versioned Storage Engine
// Copyright (C) 2026 StrataDB Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Immutable column metadata and per-version snapshot files
//!
//! Layout of a column directory:
//!
//! ```text
//! col_<id>/
//!   META            immutable type metadata, written once at creation
//!   DN              fixed-size descriptor arena
//!   DATA            pack payload heap (append allocated)
//!   V/<xid>         one snapshot per committed version
//!   DICT/<ver>      dictionary snapshots (lookup columns)
//!   FILTERS/{BLOOM,CMAP,HIST}/<xid>
//! ```
//!
//! A snapshot file is the whole truth of one version: the header plus the
//! ordered descriptor-slot vector. It is written as a unit with a magic
//! prefix and a blake3 checksum.

use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Result, StrataError};
use crate::types::{Collation, ColumnKind, ColumnType};

pub const COL_META_FILE: &str = "META";
pub const COL_DN_FILE: &str = "DN";
pub const COL_DATA_FILE: &str = "DATA";
pub const COL_VERSION_DIR: &str = "V";
pub const COL_DICT_DIR: &str = "DICT";
pub const COL_FILTER_DIR: &str = "FILTERS";
pub const COL_FILTER_BLOOM_DIR: &str = "BLOOM";
pub const COL_FILTER_CMAP_DIR: &str = "CMAP";
pub const COL_FILTER_HIST_DIR: &str = "HIST";

pub const COL_FILE_MAGIC: u32 = 0x314D_4353; // "SCM1"
pub const COL_FILE_VERSION: u32 = 1;
const SNAPSHOT_MAGIC: u32 = 0x3153_5653; // "SVS1"

const META_DISK_SIZE: usize = 20;
const HDR_DISK_SIZE: usize = 72;
const CHECKSUM_SIZE: usize = 32;

const META_FLAG_NOT_NULL: u8 = 1;
const META_FLAG_LOOKUP: u8 = 1 << 1;

/// Immutable column metadata (the META file). Never rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMeta {
    pub magic: u32,
    pub version: u32,
    pub pss: u8,
    pub kind: ColumnKind,
    pub fmt: u8,
    pub not_null: bool,
    pub lookup: bool,
    pub precision: u32,
    pub scale: u8,
    pub collation: Collation,
}

impl ColumnMeta {
    pub fn new(ctype: &ColumnType, pss: u8) -> Self {
        Self {
            magic: COL_FILE_MAGIC,
            version: COL_FILE_VERSION,
            pss,
            kind: ctype.kind,
            fmt: 0,
            not_null: ctype.not_null,
            lookup: ctype.lookup,
            precision: ctype.precision,
            scale: ctype.scale,
            collation: ctype.collation,
        }
    }

    pub fn column_type(&self) -> ColumnType {
        ColumnType {
            kind: self.kind,
            not_null: self.not_null,
            lookup: self.lookup,
            precision: self.precision,
            scale: self.scale,
            collation: self.collation,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut buf = [0u8; META_DISK_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.version);
        buf[8] = self.pss;
        buf[9] = self.kind.code();
        buf[10] = self.fmt;
        let mut flags = 0u8;
        if self.not_null {
            flags |= META_FLAG_NOT_NULL;
        }
        if self.lookup {
            flags |= META_FLAG_LOOKUP;
        }
        buf[11] = flags;
        LittleEndian::write_u32(&mut buf[12..16], self.precision);
        buf[16] = self.scale;
        buf[17] = self.collation as u8;

        let mut f = File::create(path)?;
        f.write_all(&buf)?;
        f.sync_all()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut buf = [0u8; META_DISK_SIZE];
        let mut f = File::open(path)?;
        f.read_exact(&mut buf)?;

        let magic = LittleEndian::read_u32(&buf[0..4]);
        if magic != COL_FILE_MAGIC {
            return Err(StrataError::DataFormat {
                path: path.display().to_string(),
                details: format!("bad column magic {magic:#x}"),
            });
        }
        let kind = ColumnKind::from_code(buf[9]).ok_or_else(|| StrataError::DataFormat {
            path: path.display().to_string(),
            details: format!("unknown column kind {}", buf[9]),
        })?;
        let flags = buf[11];
        Ok(Self {
            magic,
            version: LittleEndian::read_u32(&buf[4..8]),
            pss: buf[8],
            kind,
            fmt: buf[10],
            not_null: flags & META_FLAG_NOT_NULL != 0,
            lookup: flags & META_FLAG_LOOKUP != 0,
            precision: LittleEndian::read_u32(&buf[12..16]),
            scale: buf[16],
            collation: Collation::from_code(buf[17]),
        })
    }
}

/// Per-version attribute header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnVersionHeader {
    /// Total rows.
    pub nr: u64,
    /// Total nulls.
    pub nn: u64,
    /// Pack count.
    pub np: u32,
    pub auto_inc: u64,
    /// Column-wide 1-level statistics.
    pub min: i64,
    pub max: i64,
    /// Dictionary version, 0 when the column has no dictionary.
    pub dict_ver: u32,
    pub unique: bool,
    pub unique_updated: bool,
    pub natural_size: u64,
    pub compressed_size: u64,
}

impl ColumnVersionHeader {
    fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HDR_DISK_SIZE);
        LittleEndian::write_u64(&mut buf[0..8], self.nr);
        LittleEndian::write_u64(&mut buf[8..16], self.nn);
        LittleEndian::write_u32(&mut buf[16..20], self.np);
        LittleEndian::write_u32(&mut buf[20..24], 0);
        LittleEndian::write_u64(&mut buf[24..32], self.auto_inc);
        LittleEndian::write_i64(&mut buf[32..40], self.min);
        LittleEndian::write_i64(&mut buf[40..48], self.max);
        LittleEndian::write_u32(&mut buf[48..52], self.dict_ver);
        buf[52] = self.unique as u8;
        buf[53] = self.unique_updated as u8;
        buf[54..56].fill(0);
        LittleEndian::write_u64(&mut buf[56..64], self.natural_size);
        LittleEndian::write_u64(&mut buf[64..72], self.compressed_size);
    }

    fn read_from(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= HDR_DISK_SIZE);
        Self {
            nr: LittleEndian::read_u64(&buf[0..8]),
            nn: LittleEndian::read_u64(&buf[8..16]),
            np: LittleEndian::read_u32(&buf[16..20]),
            auto_inc: LittleEndian::read_u64(&buf[24..32]),
            min: LittleEndian::read_i64(&buf[32..40]),
            max: LittleEndian::read_i64(&buf[40..48]),
            dict_ver: LittleEndian::read_u32(&buf[48..52]),
            unique: buf[52] != 0,
            unique_updated: buf[53] != 0,
            natural_size: LittleEndian::read_u64(&buf[56..64]),
            compressed_size: LittleEndian::read_u64(&buf[64..72]),
        }
    }
}

/// Write one version snapshot: header plus the descriptor-slot vector.
pub fn write_snapshot(
    path: &Path,
    hdr: &ColumnVersionHeader,
    idx: &[u32],
    sync: bool,
) -> Result<()> {
    let mut buf = Vec::with_capacity(4 + HDR_DISK_SIZE + idx.len() * 4 + CHECKSUM_SIZE);
    buf.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
    let mut hdr_buf = [0u8; HDR_DISK_SIZE];
    hdr.write_to(&mut hdr_buf);
    buf.extend_from_slice(&hdr_buf);
    for &pi in idx {
        buf.extend_from_slice(&pi.to_le_bytes());
    }
    let checksum = blake3::hash(&buf);
    buf.extend_from_slice(checksum.as_bytes());

    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    f.write_all(&buf)?;
    if sync {
        f.sync_all()?;
    }
    Ok(())
}

/// Read a version snapshot back; validates magic and checksum.
pub fn read_snapshot(path: &Path) -> Result<(ColumnVersionHeader, Vec<u32>)> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < 4 + HDR_DISK_SIZE + CHECKSUM_SIZE {
        return Err(StrataError::DataFormat {
            path: path.display().to_string(),
            details: "snapshot file too small".into(),
        });
    }
    let (data, stored) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
    let computed = blake3::hash(data);
    if computed.as_bytes() != stored {
        return Err(StrataError::Corruption(format!(
            "snapshot checksum mismatch in {}",
            path.display()
        )));
    }
    let magic = LittleEndian::read_u32(&data[0..4]);
    if magic != SNAPSHOT_MAGIC {
        return Err(StrataError::DataFormat {
            path: path.display().to_string(),
            details: format!("bad snapshot magic {magic:#x}"),
        });
    }
    let hdr = ColumnVersionHeader::read_from(&data[4..4 + HDR_DISK_SIZE]);
    let body = &data[4 + HDR_DISK_SIZE..];
    if body.len() != hdr.np as usize * 4 {
        return Err(StrataError::DataFormat {
            path: path.display().to_string(),
            details: format!(
                "snapshot body {} bytes, expected {} packs",
                body.len(),
                hdr.np
            ),
        });
    }
    let mut idx = Vec::with_capacity(hdr.np as usize);
    for chunk in body.chunks_exact(4) {
        idx.push(LittleEndian::read_u32(chunk));
    }
    Ok((hdr, idx))
}
