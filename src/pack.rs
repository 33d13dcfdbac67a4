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

//! Pack payloads
//!
//! A pack is one row group of a single column: numeric packs hold 64-bit
//! codes plus a null mask, string packs hold an offset/length-addressed
//! byte arena plus a null mask. Packs are owned by the process-wide cache
//! and pinned through the descriptor's pack pointer word; the pin count
//! here only protects against cache eviction.
//!
//! Serialised form: magic `SPK1`, kind byte, row count, body, blake3
//! checksum. Payloads are stored uncompressed.

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::cache::PackCoordinate;
use crate::dpn::{Dpn, DpnData};
use crate::error::{Result, StrataError};
use crate::share::ColumnShare;
use crate::types::PackType;

const PACK_MAGIC: u32 = 0x314B_5053; // "SPK1"
const CHECKSUM_SIZE: usize = 32;

/// Growable bit mask tracking which rows are null.
#[derive(Debug, Clone, Default)]
pub struct NullMask {
    words: Vec<u64>,
    len: usize,
}

impl NullMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, null: bool) {
        let i = self.len;
        self.len += 1;
        if i / 64 >= self.words.len() {
            self.words.push(0);
        }
        if null {
            self.words[i / 64] |= 1 << (i % 64);
        }
    }

    pub fn get(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        self.words[i / 64] & (1 << (i % 64)) != 0
    }

    pub fn set(&mut self, i: usize, null: bool) {
        debug_assert!(i < self.len);
        if null {
            self.words[i / 64] |= 1 << (i % 64);
        } else {
            self.words[i / 64] &= !(1 << (i % 64));
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn words(&self) -> &[u64] {
        &self.words
    }

    fn from_words(words: Vec<u64>, len: usize) -> Self {
        Self { words, len }
    }
}

#[derive(Debug)]
enum PackBody {
    Int {
        values: Vec<i64>,
        nulls: NullMask,
    },
    Str {
        offs: Vec<u32>,
        lens: Vec<u32>,
        bytes: Vec<u8>,
        nulls: NullMask,
    },
}

/// One cached row-group payload.
#[derive(Debug)]
pub struct Pack {
    coord: PackCoordinate,
    kind: PackType,
    body: RwLock<PackBody>,
    /// Cache pin count; non-zero prevents eviction.
    pin: AtomicU32,
}

impl Pack {
    pub fn new(coord: PackCoordinate, kind: PackType) -> Self {
        let body = match kind {
            PackType::Int => PackBody::Int {
                values: Vec::new(),
                nulls: NullMask::new(),
            },
            PackType::Str => PackBody::Str {
                offs: Vec::new(),
                lens: Vec::new(),
                bytes: Vec::new(),
                nulls: NullMask::new(),
            },
        };
        Self {
            coord,
            kind,
            body: RwLock::new(body),
            pin: AtomicU32::new(0),
        }
    }

    /// Build the in-memory payload of a trivial descriptor: all nulls, or
    /// the repeated uniform value.
    pub fn materialize_trivial(coord: PackCoordinate, kind: PackType, dpn: &DpnData) -> Self {
        let pack = Self::new(coord, kind);
        {
            let mut body = pack.body.write();
            match &mut *body {
                PackBody::Int { values, nulls } => {
                    let uniform = dpn.nn == 0 && dpn.nr > 0;
                    for _ in 0..dpn.nr {
                        values.push(if uniform { dpn.min } else { 0 });
                        nulls.push(!uniform);
                    }
                }
                PackBody::Str {
                    offs, lens, nulls, ..
                } => {
                    // string packs are only trivial when null-only
                    for _ in 0..dpn.nr {
                        offs.push(0);
                        lens.push(0);
                        nulls.push(true);
                    }
                }
            }
        }
        pack
    }

    pub fn coord(&self) -> PackCoordinate {
        self.coord
    }

    pub fn kind(&self) -> PackType {
        self.kind
    }

    pub fn rows(&self) -> u32 {
        match &*self.body.read() {
            PackBody::Int { values, .. } => values.len() as u32,
            PackBody::Str { offs, .. } => offs.len() as u32,
        }
    }

    // --- cache pinning (eviction guard) ---

    pub fn lock(&self) {
        self.pin.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unlock(&self) {
        let prev = self.pin.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "pack unpinned below zero");
    }

    pub fn is_locked(&self) -> bool {
        self.pin.load(Ordering::Acquire) > 0
    }

    // --- row access ---

    pub fn is_null(&self, offset: usize) -> bool {
        match &*self.body.read() {
            PackBody::Int { nulls, .. } => nulls.get(offset),
            PackBody::Str { nulls, .. } => nulls.get(offset),
        }
    }

    /// Stored 1-level code; `None` for nulls or string packs.
    pub fn value_int(&self, offset: usize) -> Option<i64> {
        match &*self.body.read() {
            PackBody::Int { values, nulls } => {
                if nulls.get(offset) {
                    None
                } else {
                    Some(values[offset])
                }
            }
            PackBody::Str { .. } => None,
        }
    }

    /// Raw bytes of a string-pack row; `None` for nulls or numeric packs.
    pub fn value_binary(&self, offset: usize) -> Option<Vec<u8>> {
        match &*self.body.read() {
            PackBody::Str {
                offs,
                lens,
                bytes,
                nulls,
            } => {
                if nulls.get(offset) {
                    None
                } else {
                    let start = offs[offset] as usize;
                    let len = lens[offset] as usize;
                    Some(bytes[start..start + len].to_vec())
                }
            }
            PackBody::Int { .. } => None,
        }
    }

    // --- appends (load path; descriptor stats are kept by the caller) ---

    pub fn append_int(&self, v: Option<i64>) {
        let mut body = self.body.write();
        match &mut *body {
            PackBody::Int { values, nulls } => {
                values.push(v.unwrap_or(0));
                nulls.push(v.is_none());
            }
            PackBody::Str { .. } => unreachable!("append_int on a string pack"),
        }
    }

    pub fn append_str(&self, v: Option<&[u8]>) {
        let mut body = self.body.write();
        match &mut *body {
            PackBody::Str {
                offs,
                lens,
                bytes,
                nulls,
            } => match v {
                Some(b) => {
                    offs.push(bytes.len() as u32);
                    lens.push(b.len() as u32);
                    bytes.extend_from_slice(b);
                    nulls.push(false);
                }
                None => {
                    offs.push(bytes.len() as u32);
                    lens.push(0);
                    nulls.push(true);
                }
            },
            PackBody::Int { .. } => unreachable!("append_str on a numeric pack"),
        }
    }

    // --- in-place updates; return the previous value ---

    pub fn set_int(&self, offset: usize, v: Option<i64>) -> Option<i64> {
        let mut body = self.body.write();
        match &mut *body {
            PackBody::Int { values, nulls } => {
                let old = if nulls.get(offset) {
                    None
                } else {
                    Some(values[offset])
                };
                values[offset] = v.unwrap_or(0);
                nulls.set(offset, v.is_none());
                old
            }
            PackBody::Str { .. } => unreachable!("set_int on a string pack"),
        }
    }

    pub fn set_str(&self, offset: usize, v: Option<&[u8]>) -> Option<Vec<u8>> {
        let mut body = self.body.write();
        match &mut *body {
            PackBody::Str {
                offs,
                lens,
                bytes,
                nulls,
            } => {
                let old = if nulls.get(offset) {
                    None
                } else {
                    let start = offs[offset] as usize;
                    let len = lens[offset] as usize;
                    Some(bytes[start..start + len].to_vec())
                };
                match v {
                    Some(b) => {
                        // new bytes go at the end of the arena; the stale
                        // region is compacted away at save time
                        offs[offset] = bytes.len() as u32;
                        lens[offset] = b.len() as u32;
                        bytes.extend_from_slice(b);
                        nulls.set(offset, false);
                    }
                    None => {
                        lens[offset] = 0;
                        nulls.set(offset, true);
                    }
                }
                old
            }
            PackBody::Int { .. } => unreachable!("set_str on a numeric pack"),
        }
    }

    /// Deep copy under a new coordinate (copy-on-write).
    pub fn clone_for(&self, coord: PackCoordinate) -> Pack {
        let body = self.body.read();
        let new_body = match &*body {
            PackBody::Int { values, nulls } => PackBody::Int {
                values: values.clone(),
                nulls: nulls.clone(),
            },
            PackBody::Str {
                offs,
                lens,
                bytes,
                nulls,
            } => PackBody::Str {
                offs: offs.clone(),
                lens: lens.clone(),
                bytes: bytes.clone(),
                nulls: nulls.clone(),
            },
        };
        Pack {
            coord,
            kind: self.kind,
            body: RwLock::new(new_body),
            pin: AtomicU32::new(0),
        }
    }

    // --- serialisation ---

    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.body.read();
        let mut buf = Vec::new();
        buf.extend_from_slice(&PACK_MAGIC.to_le_bytes());
        buf.push(match self.kind {
            PackType::Int => 0,
            PackType::Str => 1,
        });
        buf.extend_from_slice(&[0u8; 3]);

        match &*body {
            PackBody::Int { values, nulls } => {
                buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
                for v in values {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                write_mask(&mut buf, nulls);
            }
            PackBody::Str {
                offs,
                lens,
                bytes,
                nulls,
            } => {
                let nr = offs.len();
                buf.extend_from_slice(&(nr as u32).to_le_bytes());
                // compact the arena: stale update regions are dropped
                let mut packed = Vec::with_capacity(bytes.len());
                for i in 0..nr {
                    let len = if nulls.get(i) { 0 } else { lens[i] as usize };
                    buf.extend_from_slice(&(len as u32).to_le_bytes());
                    if len != 0 {
                        let start = offs[i] as usize;
                        packed.extend_from_slice(&bytes[start..start + len]);
                    }
                }
                buf.extend_from_slice(&(packed.len() as u32).to_le_bytes());
                buf.extend_from_slice(&packed);
                write_mask(&mut buf, nulls);
            }
        }

        let checksum = blake3::hash(&buf);
        buf.extend_from_slice(checksum.as_bytes());
        buf
    }

    pub fn from_bytes(coord: PackCoordinate, data: &[u8]) -> Result<Self> {
        if data.len() < 12 + CHECKSUM_SIZE {
            return Err(StrataError::Corruption("pack payload too small".into()));
        }
        let (body_bytes, stored) = data.split_at(data.len() - CHECKSUM_SIZE);
        let computed = blake3::hash(body_bytes);
        if computed.as_bytes() != stored {
            return Err(StrataError::Corruption(format!(
                "pack checksum mismatch at {coord:?}"
            )));
        }
        let magic = LittleEndian::read_u32(&body_bytes[0..4]);
        if magic != PACK_MAGIC {
            return Err(StrataError::Corruption(format!(
                "bad pack magic {magic:#x} at {coord:?}"
            )));
        }
        let kind = match body_bytes[4] {
            0 => PackType::Int,
            1 => PackType::Str,
            other => {
                return Err(StrataError::BadPackType(format!(
                    "unknown pack kind {other} at {coord:?}"
                )))
            }
        };
        let nr = LittleEndian::read_u32(&body_bytes[8..12]) as usize;
        let mut pos = 12;

        let body = match kind {
            PackType::Int => {
                let mut values = Vec::with_capacity(nr);
                for _ in 0..nr {
                    values.push(LittleEndian::read_i64(&body_bytes[pos..pos + 8]));
                    pos += 8;
                }
                let nulls = read_mask(body_bytes, &mut pos, nr)?;
                PackBody::Int { values, nulls }
            }
            PackType::Str => {
                let mut lens = Vec::with_capacity(nr);
                for _ in 0..nr {
                    lens.push(LittleEndian::read_u32(&body_bytes[pos..pos + 4]));
                    pos += 4;
                }
                let arena_len = LittleEndian::read_u32(&body_bytes[pos..pos + 4]) as usize;
                pos += 4;
                if pos + arena_len > body_bytes.len() {
                    return Err(StrataError::Corruption("pack arena out of bounds".into()));
                }
                let bytes = body_bytes[pos..pos + arena_len].to_vec();
                pos += arena_len;
                let nulls = read_mask(body_bytes, &mut pos, nr)?;

                let mut offs = Vec::with_capacity(nr);
                let mut off = 0u32;
                for &len in &lens {
                    offs.push(off);
                    off += len;
                }
                PackBody::Str {
                    offs,
                    lens,
                    bytes,
                    nulls,
                }
            }
        };

        Ok(Self {
            coord,
            kind,
            body: RwLock::new(body),
            pin: AtomicU32::new(0),
        })
    }

    /// Persist the payload into the column's DATA heap and stamp the
    /// descriptor with the new address.
    pub fn save(&self, share: &ColumnShare, dpn: &Dpn) -> Result<()> {
        let bytes = self.to_bytes();
        let addr = share.append_data(&bytes)?;
        dpn.with(|d| {
            d.addr = addr;
            d.len = bytes.len() as u32;
            d.synced = true;
        });
        Ok(())
    }
}

fn write_mask(buf: &mut Vec<u8>, mask: &NullMask) {
    let words = mask.words();
    buf.extend_from_slice(&(words.len() as u32).to_le_bytes());
    for w in words {
        buf.extend_from_slice(&w.to_le_bytes());
    }
}

fn read_mask(data: &[u8], pos: &mut usize, len: usize) -> Result<NullMask> {
    if *pos + 4 > data.len() {
        return Err(StrataError::Corruption("pack null mask truncated".into()));
    }
    let nwords = LittleEndian::read_u32(&data[*pos..*pos + 4]) as usize;
    *pos += 4;
    if *pos + nwords * 8 > data.len() {
        return Err(StrataError::Corruption("pack null mask truncated".into()));
    }
    let mut words = Vec::with_capacity(nwords);
    for _ in 0..nwords {
        words.push(LittleEndian::read_u64(&data[*pos..*pos + 8]));
        *pos += 8;
    }
    Ok(NullMask::from_words(words, len))
}
