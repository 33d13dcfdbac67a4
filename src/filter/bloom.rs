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

//! Per-pack Bloom filters for string packs
//!
//! Double hashing over a single base hash, after Kirsch & Mitzenmacher:
//! `h_i(x) = h1(x) + i * h2(x) (mod m)`. A missing block answers
//! conservatively.

use byteorder::{ByteOrder, LittleEndian};
use std::hash::{Hash, Hasher};
use std::path::Path;

use super::{read_filter_file, write_filter_file};
use crate::error::Result;
use crate::pack::Pack;

const BLOOM_MAGIC: u32 = 0x3142_4653; // "SFB1"

const DEFAULT_FPR: f64 = 0.01;

/// One pack's membership filter.
#[derive(Debug, Clone)]
pub struct BloomBlock {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: usize,
}

impl BloomBlock {
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1);
        let m = (-(n as f64) * false_positive_rate.ln() / (2.0_f64.ln().powi(2))).ceil() as usize;
        let num_bits = m.max(64);
        let k = ((num_bits as f64 / n as f64) * 2.0_f64.ln()).ceil() as usize;
        let num_hashes = k.clamp(1, 16);
        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            num_bits,
            num_hashes,
        }
    }

    fn base_hashes(item: &[u8]) -> (u64, u64) {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        item.hash(&mut hasher);
        let h1 = hasher.finish();
        let h2 = (h1 >> 32) | (h1 << 32);
        (h1, h2 | 1)
    }

    pub fn insert(&mut self, item: &[u8]) {
        let (h1, h2) = Self::base_hashes(item);
        for i in 0..self.num_hashes as u64 {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) as usize) % self.num_bits;
            self.bits[bit / 64] |= 1 << (bit % 64);
        }
    }

    pub fn contains(&self, item: &[u8]) -> bool {
        let (h1, h2) = Self::base_hashes(item);
        for i in 0..self.num_hashes as u64 {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) as usize) % self.num_bits;
            if self.bits[bit / 64] & (1 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.num_bits as u64).to_le_bytes());
        buf.extend_from_slice(&(self.num_hashes as u64).to_le_bytes());
        buf.extend_from_slice(&(self.bits.len() as u32).to_le_bytes());
        for w in &self.bits {
            buf.extend_from_slice(&w.to_le_bytes());
        }
    }

    fn read_from(data: &[u8], pos: &mut usize) -> Self {
        let num_bits = LittleEndian::read_u64(&data[*pos..*pos + 8]) as usize;
        let num_hashes = LittleEndian::read_u64(&data[*pos + 8..*pos + 16]) as usize;
        let nwords = LittleEndian::read_u32(&data[*pos + 16..*pos + 20]) as usize;
        *pos += 20;
        let mut bits = Vec::with_capacity(nwords);
        for _ in 0..nwords {
            bits.push(LittleEndian::read_u64(&data[*pos..*pos + 8]));
            *pos += 8;
        }
        Self {
            bits,
            num_bits,
            num_hashes,
        }
    }
}

/// Bloom filter collection for one column version, one block per pack.
#[derive(Debug, Default)]
pub struct BloomPackFilter {
    blocks: Vec<Option<BloomBlock>>,
}

impl BloomPackFilter {
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

    /// Rebuild the block of one pack from its rows.
    pub fn update(&mut self, pi: usize, pack: &Pack) {
        self.ensure(pi);
        let mut block = BloomBlock::new(pack.rows() as usize, DEFAULT_FPR);
        for offset in 0..pack.rows() as usize {
            if let Some(bytes) = pack.value_binary(offset) {
                block.insert(&bytes);
            }
        }
        self.blocks[pi] = Some(block);
    }

    /// Can `value` occur in pack `pi`?
    pub fn possible(&self, pi: usize, value: &[u8]) -> bool {
        match self.blocks.get(pi) {
            Some(Some(block)) => block.contains(value),
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
                    b.write_to(&mut body);
                }
                None => body.push(0),
            }
        }
        write_filter_file(path, BLOOM_MAGIC, &body)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let body = read_filter_file(path, BLOOM_MAGIC)?;
        let np = LittleEndian::read_u32(&body[0..4]) as usize;
        let mut blocks = Vec::with_capacity(np);
        let mut pos = 4;
        for _ in 0..np {
            let present = body[pos];
            pos += 1;
            if present == 0 {
                blocks.push(None);
            } else {
                blocks.push(Some(BloomBlock::read_from(&body, &mut pos)));
            }
        }
        Ok(Self { blocks })
    }
}
