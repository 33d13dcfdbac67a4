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

//! Pack descriptors (DPN)
//!
//! One descriptor summarises one pack: row/null counts, min/max/sum
//! statistics, the payload address and the MVCC visibility window. The
//! descriptor also carries the pack pointer word — a single atomic u64
//! that both pins the cached pack and counts its active users:
//!
//! ```text
//! bit 63        : LOADING (one thread is fetching the pack)
//! bits 16..48   : cache slot index + 1 (0 = no pack resident)
//! bits 0..16    : use count
//! ```
//!
//! While the count is non-zero the cached pack is valid and pinned.
//! Transitions are CAS-only; a failed load must reset the word to zero so
//! another thread may retry.

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, StrataError};
use crate::txid::{TxId, MAX_XID};
use crate::types::{PackType, INVALID_ADDR, INVALID_PACK_INDEX};

/// On-disk size of one descriptor record.
pub const DPN_DISK_SIZE: usize = 88;

const LOADING_FLAG: u64 = 1 << 63;
const COUNT_MASK: u64 = 0xFFFF;
const SLOT_SHIFT: u32 = 16;
const SLOT_FIELD_MASK: u64 = 0xFFFF_FFFF << SLOT_SHIFT;

/// A single use-count increment.
pub const TAG_ONE: u64 = 1;

const FLAG_USED: u8 = 1;
const FLAG_LOCAL: u8 = 1 << 1;
const FLAG_SYNCED: u8 = 1 << 2;

/// The plain-data body of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpnData {
    pub used: bool,
    /// Belongs to an uncommitted writer.
    pub local: bool,
    /// On-disk pack image matches this descriptor.
    pub synced: bool,
    /// Rows in the pack.
    pub nr: u32,
    /// Nulls in the pack.
    pub nn: u32,
    pub xmin: TxId,
    pub xmax: TxId,
    /// Statistics; bit-reinterpreted as f64 for real columns, as an
    /// 8-byte prefix for string packs.
    pub min: i64,
    pub max: i64,
    pub sum: i64,
    /// Payload address in the DATA file, `INVALID_ADDR` when trivial.
    pub addr: u64,
    /// Serialised payload length.
    pub len: u32,
    /// Predecessor slot before copy-on-write.
    pub base: u32,
}

impl Default for DpnData {
    fn default() -> Self {
        Self {
            used: false,
            local: false,
            synced: false,
            nr: 0,
            nn: 0,
            xmin: TxId::default(),
            xmax: MAX_XID,
            min: 0,
            max: 0,
            sum: 0,
            addr: INVALID_ADDR,
            len: 0,
            base: INVALID_PACK_INDEX,
        }
    }
}

impl DpnData {
    /// All rows are null (also true for an empty descriptor).
    pub fn null_only(&self) -> bool {
        self.nn == self.nr
    }

    /// Single repeated value, no nulls. Only numeric packs can be
    /// reconstructed from this.
    pub fn uniform(&self, pack_type: PackType) -> bool {
        pack_type == PackType::Int && self.nn == 0 && self.nr > 0 && self.min == self.max
    }

    pub fn uniform_and_nulls(&self, pack_type: PackType) -> bool {
        pack_type == PackType::Int
            && self.nr > 0
            && self.nn > 0
            && self.nn < self.nr
            && self.min == self.max
    }

    /// Fully derivable from the descriptor; no payload required.
    pub fn trivial(&self, pack_type: PackType) -> bool {
        self.null_only() || self.uniform(pack_type)
    }

    pub fn min_bytes(&self) -> [u8; 8] {
        self.min.to_le_bytes()
    }

    pub fn max_bytes(&self) -> [u8; 8] {
        self.max.to_le_bytes()
    }

    pub fn set_min_bytes(&mut self, prefix: [u8; 8]) {
        self.min = i64::from_le_bytes(prefix);
    }

    pub fn set_max_bytes(&mut self, prefix: [u8; 8]) {
        self.max = i64::from_le_bytes(prefix);
    }

    pub fn min_f64(&self) -> f64 {
        f64::from_bits(self.min as u64)
    }

    pub fn max_f64(&self) -> f64 {
        f64::from_bits(self.max as u64)
    }

    pub fn sum_f64(&self) -> f64 {
        f64::from_bits(self.sum as u64)
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= DPN_DISK_SIZE);
        let mut flags = 0u8;
        if self.used {
            flags |= FLAG_USED;
        }
        if self.local {
            flags |= FLAG_LOCAL;
        }
        if self.synced {
            flags |= FLAG_SYNCED;
        }
        buf[0] = flags;
        buf[1..4].fill(0);
        LittleEndian::write_u32(&mut buf[4..8], self.nr);
        LittleEndian::write_u32(&mut buf[8..12], self.nn);
        LittleEndian::write_u32(&mut buf[12..16], self.len);
        LittleEndian::write_u32(&mut buf[16..20], self.base);
        LittleEndian::write_u32(&mut buf[20..24], 0);
        LittleEndian::write_u64(&mut buf[24..32], self.xmin.v1);
        LittleEndian::write_u64(&mut buf[32..40], self.xmin.v2);
        LittleEndian::write_u64(&mut buf[40..48], self.xmax.v1);
        LittleEndian::write_u64(&mut buf[48..56], self.xmax.v2);
        LittleEndian::write_i64(&mut buf[56..64], self.min);
        LittleEndian::write_i64(&mut buf[64..72], self.max);
        LittleEndian::write_i64(&mut buf[72..80], self.sum);
        LittleEndian::write_u64(&mut buf[80..88], self.addr);
    }

    pub fn read_from(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= DPN_DISK_SIZE);
        let flags = buf[0];
        Self {
            used: flags & FLAG_USED != 0,
            local: flags & FLAG_LOCAL != 0,
            synced: flags & FLAG_SYNCED != 0,
            nr: LittleEndian::read_u32(&buf[4..8]),
            nn: LittleEndian::read_u32(&buf[8..12]),
            len: LittleEndian::read_u32(&buf[12..16]),
            base: LittleEndian::read_u32(&buf[16..20]),
            xmin: TxId::new(
                LittleEndian::read_u64(&buf[24..32]),
                LittleEndian::read_u64(&buf[32..40]),
            ),
            xmax: TxId::new(
                LittleEndian::read_u64(&buf[40..48]),
                LittleEndian::read_u64(&buf[48..56]),
            ),
            min: LittleEndian::read_i64(&buf[56..64]),
            max: LittleEndian::read_i64(&buf[64..72]),
            sum: LittleEndian::read_i64(&buf[72..80]),
            addr: LittleEndian::read_u64(&buf[80..88]),
        }
    }
}

/// A descriptor slot: plain body behind a short lock, plus the atomic
/// pack pointer word.
#[derive(Debug)]
pub struct Dpn {
    data: RwLock<DpnData>,
    pack_ptr: AtomicU64,
}

impl Default for Dpn {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a use-count decrement.
#[derive(Debug, PartialEq, Eq)]
pub enum DecRef {
    /// Other users remain.
    Remaining,
    /// Count dropped to zero; the word was cleared. The slot of the pack
    /// that must be unpinned in the cache.
    Released(u32),
}

impl Dpn {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(DpnData::default()),
            pack_ptr: AtomicU64::new(0),
        }
    }

    /// Copy the body out.
    pub fn snapshot(&self) -> DpnData {
        *self.data.read()
    }

    /// Mutate the body under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut DpnData) -> R) -> R {
        f(&mut self.data.write())
    }

    pub fn replace(&self, data: DpnData) {
        *self.data.write() = data;
    }

    pub fn reset(&self) {
        *self.data.write() = DpnData::default();
        self.pack_ptr.store(0, Ordering::Release);
    }

    // --- pack pointer word ---

    pub fn pack_ptr_raw(&self) -> u64 {
        self.pack_ptr.load(Ordering::Acquire)
    }

    /// Unsynchronised store; only valid while the descriptor is local to
    /// a single writer.
    pub fn set_pack_ptr_raw(&self, v: u64) {
        self.pack_ptr.store(v, Ordering::Release);
    }

    /// Point the word at a cache slot with a use count of one.
    pub fn set_pack_slot(&self, slot: u32) {
        self.pack_ptr
            .store(encode_slot(slot) | TAG_ONE, Ordering::Release);
    }

    /// Resident slot, if any (regardless of the use count).
    pub fn pack_slot(&self) -> Option<u32> {
        decode_slot(self.pack_ptr.load(Ordering::Acquire))
    }

    pub fn use_count(&self) -> u64 {
        let v = self.pack_ptr.load(Ordering::Acquire);
        if v & LOADING_FLAG != 0 {
            0
        } else {
            v & COUNT_MASK
        }
    }

    /// Try to join the existing users of a loaded pack.
    pub fn inc_ref(&self) -> bool {
        let mut v = self.pack_ptr.load(Ordering::Acquire);
        loop {
            if v & LOADING_FLAG != 0 || v & SLOT_FIELD_MASK == 0 {
                return false;
            }
            debug_assert!(v & COUNT_MASK < COUNT_MASK, "use count saturated");
            match self.pack_ptr.compare_exchange_weak(
                v,
                v + TAG_ONE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => v = actual,
            }
        }
    }

    /// Try to win the right to load the pack. Exactly one thread wins
    /// for a cold word.
    pub fn begin_load(&self) -> bool {
        self.pack_ptr
            .compare_exchange(0, LOADING_FLAG, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Publish a finished load: LOADING -> slot with one user.
    pub fn finish_load(&self, slot: u32) -> Result<()> {
        self.pack_ptr
            .compare_exchange(
                LOADING_FLAG,
                encode_slot(slot) | TAG_ONE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|actual| {
                StrataError::InvariantViolation(format!(
                    "pack pointer word changed during load: {actual:#x}"
                ))
            })
    }

    /// Give up a failed load so another thread can retry.
    pub fn abort_load(&self) {
        self.pack_ptr.store(0, Ordering::Release);
    }

    /// Drop one user. When the last user leaves, the word is cleared and
    /// the released cache slot is handed back for unpinning.
    pub fn dec_ref(&self) -> Result<DecRef> {
        let mut v = self.pack_ptr.load(Ordering::Acquire);
        loop {
            if v & LOADING_FLAG != 0 || v & COUNT_MASK == 0 || v & SLOT_FIELD_MASK == 0 {
                return Err(StrataError::InvariantViolation(format!(
                    "unlock of an unlocked pack: word {v:#x}"
                )));
            }
            let newv = if v & COUNT_MASK == TAG_ONE { 0 } else { v - TAG_ONE };
            match self
                .pack_ptr
                .compare_exchange_weak(v, newv, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    return Ok(if newv == 0 {
                        DecRef::Released(decode_slot(v).expect("slot present"))
                    } else {
                        DecRef::Remaining
                    });
                }
                Err(actual) => v = actual,
            }
        }
    }
}

fn encode_slot(slot: u32) -> u64 {
    ((slot as u64) + 1) << SLOT_SHIFT
}

fn decode_slot(word: u64) -> Option<u32> {
    if word & LOADING_FLAG != 0 {
        return None;
    }
    let field = (word & SLOT_FIELD_MASK) >> SLOT_SHIFT;
    if field == 0 {
        None
    } else {
        Some((field - 1) as u32)
    }
}
