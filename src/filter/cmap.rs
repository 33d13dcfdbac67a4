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

//! Per-pack character maps for string packs
//!
//! For each of the first 64 byte positions, a 256-bit map records which
//! byte values occur at that position anywhere in the pack. Only valid
//! for binary collation; collations that transform bytes before
//! comparison skip this filter.

use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;

use super::{read_filter_file, write_filter_file};
use crate::error::Result;
use crate::pack::Pack;

const CMAP_MAGIC: u32 = 0x3143_4653; // "SFC1"

pub const CMAP_POSITIONS: usize = 64;
const WORDS_PER_POS: usize = 4;
const WORDS_PER_BLOCK: usize = CMAP_POSITIONS * WORDS_PER_POS;

type CmapBlock = Box<[u64; WORDS_PER_BLOCK]>;

/// Character-map filter for one column version.
#[derive(Debug, Default)]
pub struct CmapFilter {
    blocks: Vec<Option<CmapBlock>>,
}

impl CmapFilter {
    pub fn new(np: usize) -> Self {
        let mut blocks = Vec::with_capacity(np);
        blocks.resize_with(np, || None);
        Self { blocks }
    }

    pub fn num_packs(&self) -> usize {
        self.blocks.len()
    }

    fn ensure(&mut self, pi: usize) {
        if pi >= self.blocks.len() {
            self.blocks.resize_with(pi + 1, || None);
        }
    }

    fn set_bit(block: &mut [u64; WORDS_PER_BLOCK], pos: usize, byte: u8) {
        let base = pos * WORDS_PER_POS;
        block[base + (byte as usize) / 64] |= 1 << (byte as usize % 64);
    }

    fn get_bit(block: &[u64; WORDS_PER_BLOCK], pos: usize, byte: u8) -> bool {
        let base = pos * WORDS_PER_POS;
        block[base + (byte as usize) / 64] & (1 << (byte as usize % 64)) != 0
    }

    /// Rebuild the map of one pack from its rows.
    pub fn update(&mut self, pi: usize, pack: &Pack) {
        self.ensure(pi);
        let mut block: CmapBlock = Box::new([0u64; WORDS_PER_BLOCK]);
        for offset in 0..pack.rows() as usize {
            if let Some(bytes) = pack.value_binary(offset) {
                for (pos, &b) in bytes.iter().take(CMAP_POSITIONS).enumerate() {
                    Self::set_bit(&mut block, pos, b);
                }
            }
        }
        self.blocks[pi] = Some(block);
    }

    /// Can a value starting with `prefix` occur in pack `pi`?
    pub fn possible_prefix(&self, pi: usize, prefix: &[u8]) -> bool {
        let Some(Some(block)) = self.blocks.get(pi) else {
            return true;
        };
        prefix
            .iter()
            .take(CMAP_POSITIONS)
            .enumerate()
            .all(|(pos, &b)| Self::get_bit(block, pos, b))
    }

    /// Can `byte` occur at position `pos` in pack `pi`?
    pub fn possible_at(&self, pi: usize, pos: usize, byte: u8) -> bool {
        if pos >= CMAP_POSITIONS {
            return true;
        }
        match self.blocks.get(pi) {
            Some(Some(block)) => Self::get_bit(block, pos, byte),
            _ => true,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut body = Vec::new();
        body.extend_from_slice(&(self.blocks.len() as u32).to_le_bytes());
        for block in &self.blocks {
            match block {
                Some(b) => {
                    body.push(1);
                    for w in b.iter() {
                        body.extend_from_slice(&w.to_le_bytes());
                    }
                }
                None => body.push(0),
            }
        }
        write_filter_file(path, CMAP_MAGIC, &body)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let body = read_filter_file(path, CMAP_MAGIC)?;
        let np = LittleEndian::read_u32(&body[0..4]) as usize;
        let mut blocks = Vec::with_capacity(np);
        let mut pos = 4;
        for _ in 0..np {
            let present = body[pos];
            pos += 1;
            if present == 0 {
                blocks.push(None);
                continue;
            }
            let mut block: CmapBlock = Box::new([0u64; WORDS_PER_BLOCK]);
            for w in block.iter_mut() {
                *w = LittleEndian::read_u64(&body[pos..pos + 8]);
                pos += 8;
            }
            blocks.push(Some(block));
        }
        Ok(Self { blocks })
    }
}
