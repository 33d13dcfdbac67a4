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

//! Per-pack value histograms for numeric packs
//!
//! Each pack gets one 64-bucket occupancy word over the descriptor's
//! `[min, max]` span. A zero word means "never built" and answers
//! conservatively.

use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;

use super::{read_filter_file, write_filter_file};
use crate::dpn::DpnData;
use crate::error::Result;
use crate::pack::Pack;

const HIST_MAGIC: u32 = 0x3148_4653; // "SFH1"

pub const HIST_BUCKETS: u32 = 64;

/// Histogram filter for one column version.
#[derive(Debug, Default)]
pub struct HistFilter {
    blocks: Vec<u64>,
}

impl HistFilter {
    pub fn new(np: usize) -> Self {
        Self {
            blocks: vec![0; np],
        }
    }

    pub fn num_packs(&self) -> usize {
        self.blocks.len()
    }

    fn ensure(&mut self, pi: usize) {
        if pi >= self.blocks.len() {
            self.blocks.resize(pi + 1, 0);
        }
    }

    fn bucket(dpn: &DpnData, v: i64) -> Option<u32> {
        if v < dpn.min || v > dpn.max {
            return None;
        }
        let span = dpn.max as i128 - dpn.min as i128 + 1;
        let off = v as i128 - dpn.min as i128;
        Some((off * HIST_BUCKETS as i128 / span) as u32)
    }

    /// Rebuild the histogram of one pack from its rows.
    pub fn update(&mut self, pi: usize, dpn: &DpnData, pack: &Pack) {
        self.ensure(pi);
        if dpn.null_only() || dpn.min == dpn.max {
            // derivable from the descriptor alone
            self.blocks[pi] = 0;
            return;
        }
        let mut word = 0u64;
        for offset in 0..pack.rows() as usize {
            if let Some(v) = pack.value_int(offset) {
                if let Some(b) = Self::bucket(dpn, v) {
                    word |= 1 << b;
                }
            }
        }
        self.blocks[pi] = word;
    }

    /// Can `v` occur in pack `pi`? False only when the histogram proves
    /// absence.
    pub fn possible_value(&self, pi: usize, dpn: &DpnData, v: i64) -> bool {
        if v < dpn.min || v > dpn.max {
            return false;
        }
        let Some(&word) = self.blocks.get(pi) else {
            return true;
        };
        if word == 0 {
            return true;
        }
        match Self::bucket(dpn, v) {
            Some(b) => word & (1 << b) != 0,
            None => false,
        }
    }

    /// Can any value of `[lo, hi]` occur in pack `pi`?
    pub fn possible_range(&self, pi: usize, dpn: &DpnData, lo: i64, hi: i64) -> bool {
        if hi < dpn.min || lo > dpn.max {
            return false;
        }
        let Some(&word) = self.blocks.get(pi) else {
            return true;
        };
        if word == 0 {
            return true;
        }
        let lo_b = Self::bucket(dpn, lo.max(dpn.min)).unwrap_or(0);
        let hi_b = Self::bucket(dpn, hi.min(dpn.max)).unwrap_or(HIST_BUCKETS - 1);
        (lo_b..=hi_b).any(|b| word & (1 << b) != 0)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut body = Vec::with_capacity(4 + self.blocks.len() * 8);
        body.extend_from_slice(&(self.blocks.len() as u32).to_le_bytes());
        for w in &self.blocks {
            body.extend_from_slice(&w.to_le_bytes());
        }
        write_filter_file(path, HIST_MAGIC, &body)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let body = read_filter_file(path, HIST_MAGIC)?;
        let np = LittleEndian::read_u32(&body[0..4]) as usize;
        let mut blocks = Vec::with_capacity(np);
        for i in 0..np {
            blocks.push(LittleEndian::read_u64(&body[4 + i * 8..12 + i * 8]));
        }
        Ok(Self { blocks })
    }
}
