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

//! Per-transaction column attribute
//!
//! An `Attribute` is one transaction's view of one column: the version
//! header, the ordered vector of descriptor slots, and the
//! transaction-local mutations on top of the shared state. Readers open
//! at a committed version and never block writers; a writer buffers its
//! changes in copy-on-write descriptors and publishes them atomically:
//!
//! - `save_version` (PREPARE): flush dirty packs, filters and the
//!   dictionary, then write the new snapshot file under the writer's id.
//! - `post_commit` (PUBLISH): clear the `local` flags, stamp the
//!   predecessors' `xmax`, schedule the previous version's files for
//!   deferred removal.
//! - `rollback`: evict local packs and return their descriptor slots.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{DictCoordinate, PackCoordinate};
use crate::dictionary::Dictionary;
use crate::dpn::{DecRef, Dpn, DpnData};
use crate::engine::{Engine, Transaction};
use crate::error::{Result, StrataError};
use crate::filter::{
    filter_path, BloomPackFilter, CmapFilter, ColumnFilter, FilterCoordinate, FilterType,
    HistFilter,
};
use crate::loader::ValueCache;
use crate::meta::{read_snapshot, write_snapshot, ColumnVersionHeader};
use crate::pack::Pack;
use crate::selection::SelectionFilter;
use crate::share::ColumnShare;
use crate::txid::TxId;
use crate::types::{
    collation_cmp, format_datetime, format_decimal, pow10_u64, ColumnKind, PackOntologicalStatus,
    PackType, Value, INVALID_ADDR, INVALID_PACK_INDEX, MINUS_INF_64, NULL_VALUE_32, NULL_VALUE_64,
    PLUS_INF_64, SHORT_MAX,
};

/// Backoff while another thread loads the same pack.
const LOAD_RETRY_SLEEP: Duration = Duration::from_millis(5);

/// One transaction's view of one column.
pub struct Attribute {
    engine: Arc<Engine>,
    share: Arc<ColumnShare>,
    table_id: u32,
    column_id: u32,
    version: TxId,
    tx: Option<Transaction>,
    hdr: ColumnVersionHeader,
    idx: Vec<u32>,
    dict: Option<Arc<Dictionary>>,
    filter_hist: Option<HistFilter>,
    filter_cmap: Option<CmapFilter>,
    filter_bloom: Option<BloomPackFilter>,
    unique: bool,
    unique_updated: bool,
    no_change: bool,
}

impl Attribute {
    /// Open the column at version `xid`. A writer passes its
    /// transaction; readers pass `None`.
    pub fn open(
        engine: Arc<Engine>,
        share: Arc<ColumnShare>,
        xid: TxId,
        tx: Option<Transaction>,
    ) -> Result<Self> {
        let snap_path = share.version_dir().join(xid.file_name());
        let (hdr, idx) = read_snapshot(&snap_path)?;

        let mut attr = Self {
            table_id: share.table_id,
            column_id: share.column_id,
            engine,
            share,
            version: xid,
            tx,
            hdr,
            idx,
            dict: None,
            filter_hist: None,
            filter_cmap: None,
            filter_bloom: None,
            unique: hdr.unique,
            unique_updated: hdr.unique_updated,
            no_change: true,
        };

        if hdr.dict_ver != 0 {
            let coord = DictCoordinate {
                table: attr.table_id,
                column: attr.column_id,
                ver: hdr.dict_ver,
            };
            let dict_path = attr.share.dict_dir().join(hdr.dict_ver.to_string());
            let dict = attr
                .engine
                .cache
                .get_or_fetch_dict(coord, || Dictionary::load(&dict_path))?;
            attr.dict = Some(dict);
        }

        Ok(attr)
    }

    // --- basic accessors ---

    pub fn version(&self) -> TxId {
        self.version
    }

    pub fn header(&self) -> &ColumnVersionHeader {
        &self.hdr
    }

    pub fn num_rows(&self) -> u64 {
        self.hdr.nr
    }

    pub fn num_nulls(&self) -> u64 {
        self.hdr.nn
    }

    pub fn num_packs(&self) -> usize {
        self.idx.len()
    }

    pub fn pack_index(&self) -> &[u32] {
        &self.idx
    }

    pub fn dpn_data(&self, pi: usize) -> DpnData {
        self.share.dpn(self.idx[pi]).snapshot()
    }

    pub fn dictionary(&self) -> Option<&Arc<Dictionary>> {
        self.dict.as_ref()
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn set_unique(&mut self, unique: bool) {
        self.unique = unique;
    }

    pub fn is_unique_updated(&self) -> bool {
        self.unique_updated
    }

    pub fn set_unique_updated(&mut self, updated: bool) {
        self.unique_updated = updated;
    }

    fn row2pack(&self, row: u64) -> usize {
        (row >> self.share.pss) as usize
    }

    fn row2offset(&self, row: u64) -> usize {
        (row & ((1u64 << self.share.pss) - 1)) as usize
    }

    fn pc(&self, pi: usize) -> PackCoordinate {
        PackCoordinate {
            table: self.table_id,
            column: self.column_id,
            slot: self.idx[pi],
        }
    }

    fn pc_of_slot(&self, slot: u32) -> PackCoordinate {
        PackCoordinate {
            table: self.table_id,
            column: self.column_id,
            slot,
        }
    }

    fn writer(&self) -> Result<Transaction> {
        self.tx.ok_or(StrataError::ReadOnlyTransaction)
    }

    // --- pack residency ---

    /// The pack currently readable for `pi`: the descriptor's own pinned
    /// pack, or the copy-on-write base's for a local descriptor whose
    /// own pack is not resident.
    fn pack_for_read(&self, pi: usize) -> Option<Arc<Pack>> {
        let si = self.idx[pi];
        let d = self.share.dpn(si);
        if let Some(slot) = d.pack_slot() {
            return self.engine.cache.pack_by_slot(slot);
        }
        let snap = d.snapshot();
        if snap.local && snap.base != INVALID_PACK_INDEX {
            if let Some(slot) = self.share.dpn(snap.base).pack_slot() {
                return self.engine.cache.pack_by_slot(slot);
            }
        }
        None
    }

    /// Loader for the pack of one descriptor slot: trivial descriptors
    /// materialise from their statistics, everything else reads the DATA
    /// heap.
    fn fetch_pack(&self, slot: u32) -> Result<Pack> {
        let snap = self.share.dpn(slot).snapshot();
        let coord = self.pc_of_slot(slot);
        if snap.addr == INVALID_ADDR {
            Ok(Pack::materialize_trivial(
                coord,
                self.share.pack_type,
                &snap,
            ))
        } else {
            let bytes = self.share.read_data(snap.addr, snap.len)?;
            Pack::from_bytes(coord, &bytes)
        }
    }

    /// Materialise the pack of a local descriptor and pin it through the
    /// pointer word. No synchronisation needed: the descriptor is ours.
    fn materialize_local(&self, pi: usize) -> Result<Arc<Pack>> {
        let si = self.idx[pi];
        let d = self.share.dpn(si);
        if let Some(slot) = d.pack_slot() {
            if let Some(pack) = self.engine.cache.pack_by_slot(slot) {
                return Ok(pack);
            }
        }
        let coord = self.pc(pi);
        let (slot, pack) = self
            .engine
            .cache
            .get_or_fetch_pack(coord, || self.fetch_pack(si))?;
        d.set_pack_slot(slot);
        Ok(pack)
    }

    // --- the pack-lock protocol ---

    /// Resolve the descriptor whose pointer word manages pack `pi` for
    /// shared readers: local descriptors redirect to their copy-on-write
    /// base. A local descriptor without a base is writer-private — its
    /// pack is owned through the word set at materialisation and the
    /// count protocol must not touch it.
    fn lock_target(&self, pi: usize) -> Option<(u32, &Dpn)> {
        let si = self.idx[pi];
        let snap = self.share.dpn(si).snapshot();
        if snap.local {
            if snap.base == INVALID_PACK_INDEX {
                return None;
            }
            return Some((snap.base, self.share.dpn(snap.base)));
        }
        Some((si, self.share.dpn(si)))
    }

    /// Pin pack `pi` for use. Exactly one contending thread performs the
    /// fetch; the others back off and join once the word is published.
    pub fn lock_pack_for_use(&self, pi: usize) -> Result<()> {
        let Some((target, d)) = self.lock_target(pi) else {
            return Ok(());
        };
        let snap = d.snapshot();
        if snap.trivial(self.share.pack_type) && !snap.local {
            return Ok(());
        }

        loop {
            if d.inc_ref() {
                return Ok(());
            }
            if d.begin_load() {
                let coord = self.pc_of_slot(target);
                match self
                    .engine
                    .cache
                    .get_or_fetch_pack(coord, || self.fetch_pack(target))
                {
                    Ok((slot, _pack)) => {
                        d.finish_load(slot)?;
                        return Ok(());
                    }
                    Err(e) => {
                        // reset the word so another thread may retry
                        d.abort_load();
                        warn!("pack load failed at {coord:?}: {e}");
                        return Err(e);
                    }
                }
            }
            // another thread is loading; wait and retry
            std::thread::sleep(LOAD_RETRY_SLEEP);
        }
    }

    /// Drop one use of pack `pi`. The last user clears the word and
    /// releases the cache pin so the pack becomes evictable.
    pub fn unlock_pack_from_use(&self, pi: usize) -> Result<()> {
        let Some((_, d)) = self.lock_target(pi) else {
            return Ok(());
        };
        let snap = d.snapshot();
        if snap.trivial(self.share.pack_type) && !snap.local {
            return Ok(());
        }
        match d.dec_ref()? {
            DecRef::Remaining => {}
            DecRef::Released(slot) => {
                if let Some(pack) = self.engine.cache.pack_by_slot(slot) {
                    pack.unlock();
                }
            }
        }
        Ok(())
    }

    // --- read operations ---

    pub fn pack_ontological_status(&self, pi: usize) -> PackOntologicalStatus {
        let d = self.dpn_data(pi);
        if d.null_only() {
            return PackOntologicalStatus::NullsOnly;
        }
        if self.share.pack_type == PackType::Int && d.min == d.max {
            if d.nn == 0 {
                return PackOntologicalStatus::Uniform;
            }
            return PackOntologicalStatus::UniformAndNulls;
        }
        PackOntologicalStatus::Normal
    }

    pub fn is_null(&self, row: u64) -> Result<bool> {
        let pi = self.row2pack(row);
        let d = self.dpn_data(pi);
        if d.null_only() {
            return Ok(true);
        }
        if d.nn == 0 {
            return Ok(false);
        }
        self.lock_pack_for_use(pi)?;
        let res = (|| {
            let pack = self.pack_for_read(pi).ok_or_else(|| {
                StrataError::InvariantViolation("pack not resident after lock".into())
            })?;
            Ok(pack.is_null(self.row2offset(row)))
        })();
        self.unlock_pack_from_use(pi)?;
        res
    }

    /// The stored 1-level code of a row; `NULL_VALUE_64` for nulls. Only
    /// valid on numeric packs.
    pub fn value_int64(&self, row: u64) -> Result<i64> {
        debug_assert_eq!(self.share.pack_type, PackType::Int);
        let pi = self.row2pack(row);
        let d = self.dpn_data(pi);
        if d.null_only() {
            return Ok(NULL_VALUE_64);
        }
        if d.uniform(PackType::Int) {
            return Ok(d.min);
        }
        self.lock_pack_for_use(pi)?;
        let res = (|| {
            let pack = self.pack_for_read(pi).ok_or_else(|| {
                StrataError::InvariantViolation("pack not resident after lock".into())
            })?;
            Ok(pack.value_int(self.row2offset(row)).unwrap_or(NULL_VALUE_64))
        })();
        self.unlock_pack_from_use(pi)?;
        res
    }

    /// Raw bytes of a string-pack row.
    fn value_string(&self, row: u64) -> Result<Option<Vec<u8>>> {
        debug_assert_eq!(self.share.pack_type, PackType::Str);
        let pi = self.row2pack(row);
        let d = self.dpn_data(pi);
        if d.null_only() {
            return Ok(None);
        }
        self.lock_pack_for_use(pi)?;
        let res = (|| {
            let pack = self.pack_for_read(pi).ok_or_else(|| {
                StrataError::InvariantViolation("pack not resident after lock".into())
            })?;
            Ok(pack.value_binary(self.row2offset(row)))
        })();
        self.unlock_pack_from_use(pi)?;
        res
    }

    /// Null-aware typed read. For lookup columns `lookup_to_num` selects
    /// between the dictionary code and the decoded string. TIMESTAMP
    /// values convert from stored UTC into the session timezone.
    pub fn get_value(&self, row: u64, lookup_to_num: bool) -> Result<Value> {
        if self.is_null(row)? {
            return Ok(Value::Null);
        }
        let kind = self.share.col_type.kind;

        if kind.is_string_like() {
            if self.share.pack_type == PackType::Str {
                let bytes = self.value_string(row)?.unwrap_or_default();
                return Ok(Value::Bytes(bytes));
            }
            // lookup column
            let code = self.value_int64(row)?;
            if lookup_to_num {
                return Ok(Value::Int(code));
            }
            let dict = self.dict.as_ref().ok_or_else(|| {
                StrataError::InvariantViolation("lookup column without dictionary".into())
            })?;
            let bytes = dict.value(code as i32).ok_or_else(|| {
                StrataError::Corruption(format!("dictionary code {code} out of range"))
            })?;
            return Ok(Value::Bytes(bytes));
        }

        let v = self.value_int64(row)?;
        Ok(match kind {
            k if k.is_integer() => Value::Int(v),
            ColumnKind::Num => Value::Decimal {
                v,
                scale: self.share.col_type.scale,
            },
            k if k.is_real() => Value::Real(f64::from_bits(v as u64)),
            ColumnKind::Timestamp => {
                Value::DateTime(v + self.engine.config().session_tz_offset_secs)
            }
            _ => Value::DateTime(v),
        })
    }

    /// Raw bytes of the underlying value, without null-termination
    /// conventions. `None` for nulls.
    pub fn get_value_bin(&self, row: u64) -> Result<Option<Vec<u8>>> {
        if self.is_null(row)? {
            return Ok(None);
        }
        let kind = self.share.col_type.kind;
        if kind.is_string_like() {
            if self.share.pack_type == PackType::Int {
                let code = self.value_int64(row)?;
                let dict = self.dict.as_ref().ok_or_else(|| {
                    StrataError::InvariantViolation("lookup column without dictionary".into())
                })?;
                return Ok(dict.value(code as i32));
            }
            return self.value_string(row);
        }
        let v = self.value_int64(row)?;
        if kind.is_integer() && kind != ColumnKind::BigInt {
            Ok(Some((v as i32).to_le_bytes().to_vec()))
        } else {
            Ok(Some(v.to_le_bytes().to_vec()))
        }
    }

    /// Byte length of the underlying value. Fixed-width kinds answer
    /// from the type alone, without touching the pack.
    pub fn get_length(&self, row: u64) -> Result<u64> {
        let pi = self.row2pack(row);
        if self.dpn_data(pi).null_only() {
            return Ok(0);
        }
        if self.share.pack_type != PackType::Str {
            return Ok(self.share.col_type.display_size() as u64);
        }
        Ok(self
            .value_string(row)?
            .map(|b| b.len() as u64)
            .unwrap_or(0))
    }

    pub fn get_num_of_nulls(&self, pack: Option<usize>) -> u64 {
        match pack {
            None => self.hdr.nn,
            Some(pi) => self.dpn_data(pi).nn as u64,
        }
    }

    pub fn get_min_int64(&self, pi: usize) -> i64 {
        if self.pack_ontological_status(pi) == PackOntologicalStatus::NullsOnly {
            return MINUS_INF_64;
        }
        self.dpn_data(pi).min
    }

    pub fn get_max_int64(&self, pi: usize) -> i64 {
        if self.pack_ontological_status(pi) == PackOntologicalStatus::NullsOnly {
            return PLUS_INF_64;
        }
        self.dpn_data(pi).max
    }

    /// Pack sum; `NULL_VALUE_64` for null-only packs, string columns and
    /// when the conservative overflow test fails.
    pub fn get_sum(&self, pi: usize, nonnegative: &mut bool) -> i64 {
        let d = self.dpn_data(pi);
        if self.pack_ontological_status(pi) == PackOntologicalStatus::NullsOnly
            || self.share.col_type.kind.is_string_like()
        {
            return NULL_VALUE_64;
        }
        if !self.share.col_type.kind.is_real()
            && (d.min < MINUS_INF_64 / (SHORT_MAX + 1) || d.max > PLUS_INF_64 / (SHORT_MAX + 1))
        {
            return NULL_VALUE_64;
        }
        *nonnegative = d.min >= 0;
        d.sum
    }

    /// Reconstructed min prefix of a string pack (at most 8 bytes).
    pub fn get_min_string(&self, pi: usize) -> Option<Vec<u8>> {
        if self.pack_ontological_status(pi) == PackOntologicalStatus::NullsOnly
            || self.share.pack_type != PackType::Str
        {
            return None;
        }
        Some(trim_prefix(self.dpn_data(pi).min_bytes()))
    }

    /// Reconstructed max prefix of a string pack (at most 8 bytes).
    pub fn get_max_string(&self, pi: usize) -> Option<Vec<u8>> {
        if self.pack_ontological_status(pi) == PackOntologicalStatus::NullsOnly
            || self.share.pack_type != PackType::Str
        {
            return None;
        }
        Some(trim_prefix(self.dpn_data(pi).max_bytes()))
    }

    /// Length of the shared prefix of a string pack's min and max.
    pub fn get_prefix_length(&self, pi: usize) -> usize {
        if self.pack_ontological_status(pi) == PackOntologicalStatus::NullsOnly {
            return 0;
        }
        let d = self.dpn_data(pi);
        let (min, max) = (d.min_bytes(), d.max_bytes());
        let mut n = 0;
        while n < 8 && min[n] != 0 && min[n] == max[n] {
            n += 1;
        }
        n
    }

    /// Data bytes represented by one pack: 0 when null-only, the
    /// declared precision for fixed-code packs, the accumulated byte
    /// size for string packs.
    pub fn get_actual_size(&self, pi: usize) -> u64 {
        if self.pack_ontological_status(pi) == PackOntologicalStatus::NullsOnly {
            return 0;
        }
        if self.share.col_type.lookup || self.share.pack_type != PackType::Str {
            return self.share.col_type.precision as u64;
        }
        self.dpn_data(pi).sum as u64
    }

    /// Uncompressed size estimate of the whole column.
    pub fn compute_natural_size(&self) -> u64 {
        let kind = self.share.col_type.kind;
        let nr = self.hdr.nr;
        let null_bitmap = if self.share.col_type.not_null { 0 } else { nr / 8 };
        let body = match kind {
            ColumnKind::String | ColumnKind::Bytes | ColumnKind::Date => {
                self.share.col_type.precision as u64 * nr
            }
            ColumnKind::Time | ColumnKind::Year | ColumnKind::DateTime | ColumnKind::Timestamp => {
                kind.display_size() as u64 * nr
            }
            ColumnKind::Num => {
                (self.share.col_type.precision as u64
                    + if self.share.col_type.scale != 0 { 1 } else { 0 })
                    * nr
            }
            ColumnKind::BigInt | ColumnKind::Real => 8 * nr,
            ColumnKind::Float | ColumnKind::Int => 4 * nr,
            ColumnKind::MediumInt => 3 * nr,
            ColumnKind::SmallInt => 2 * nr,
            ColumnKind::TinyInt => nr,
            ColumnKind::Varchar | ColumnKind::VarBytes => self.hdr.natural_size,
        };
        null_bitmap + body
    }

    // --- value encoding ---

    /// Dictionary code for a string value. With `new_val`, an absent
    /// value clones the dictionary (copy-on-write under `dict_ver + 1`)
    /// and appends; without it, absence yields the NULL code. Non-string
    /// columns parse the bytes numerically; temporal columns must be
    /// pre-converted by the caller.
    pub fn encode_string(&mut self, value: Option<&[u8]>, new_val: bool) -> Result<i32> {
        let Some(bytes) = value else {
            return Ok(NULL_VALUE_32);
        };
        let kind = self.share.col_type.kind;

        if kind.is_string_like() {
            debug_assert_eq!(self.share.pack_type, PackType::Int);
            let dict = self.dict.as_ref().ok_or_else(|| {
                StrataError::InvariantViolation("lookup column without dictionary".into())
            })?;
            if let Some(code) = dict.code(bytes) {
                return Ok(code);
            }
            if !new_val {
                return Ok(NULL_VALUE_32);
            }
            self.writer()?;
            self.dict_copy_on_write();
            let dict = self.dict.as_ref().expect("dictionary present");
            return Ok(dict.add(bytes));
        }

        if kind.is_temporal() || kind == ColumnKind::BigInt {
            return Err(StrataError::InvariantViolation(
                "temporal and bigint values must be pre-converted".into(),
            ));
        }

        Ok(parse_i64(bytes) as i32)
    }

    /// Clone-before-mutate for the dictionary; the clone is published to
    /// the cache under the bumped version immediately so concurrent
    /// fetches of the new version deduplicate.
    fn dict_copy_on_write(&mut self) {
        let dict = self.dict.as_ref().expect("lookup column dictionary");
        if dict.changed() {
            return;
        }
        let clone = Arc::new(dict.clone_dict());
        self.hdr.dict_ver += 1;
        self.engine.cache.put_dict(
            DictCoordinate {
                table: self.table_id,
                column: self.column_id,
                ver: self.hdr.dict_ver,
            },
            clone.clone(),
        );
        self.dict = Some(clone);
    }

    /// Universal encoder into a 1-level 64-bit code. Real columns store
    /// the double's bit pattern; fixed-scale columns rescale, rounding
    /// down and clamping to the infinity sentinels on overflow.
    /// `rounded` reports a lossy rescale.
    pub fn encode_value64(&mut self, v: &Value, rounded: &mut bool) -> Result<i64> {
        *rounded = false;
        if v.is_null() {
            return Ok(NULL_VALUE_64);
        }

        if self.share.col_type.lookup {
            if let Value::Bytes(b) = v {
                let b = b.clone();
                return Ok(self.encode_string(Some(&b), false)? as i64);
            }
        }

        let kind = self.share.col_type.kind;
        if kind.is_temporal() {
            return match v {
                Value::DateTime(x) | Value::Int(x) => Ok(*x),
                _ => Err(StrataError::InvariantViolation(
                    "temporal column expects a packed temporal value".into(),
                )),
            };
        }

        if self.share.pack_type != PackType::Int {
            return Err(StrataError::InvariantViolation(
                "encode_value64 on a string pack".into(),
            ));
        }

        let scale = self.share.col_type.scale;
        if kind.is_real() {
            return match v {
                Value::Real(d) => Ok(d.to_bits() as i64),
                Value::Int(x) => Ok((*x as f64).to_bits() as i64),
                Value::Decimal { v, scale } => {
                    let d = *v as f64 / pow10_u64(*scale as u32) as f64;
                    Ok(d.to_bits() as i64)
                }
                _ => Err(StrataError::InvariantViolation(
                    "real column expects a numeric value".into(),
                )),
            };
        }

        match v {
            Value::Real(d) => {
                // double into a fixed-scale column: scale up and clamp.
                // The rounding epsilon is intentionally absolute.
                let vd = d * pow10_u64(scale as u32) as f64;
                if vd > PLUS_INF_64 as f64 {
                    return Ok(PLUS_INF_64);
                }
                if vd < MINUS_INF_64 as f64 {
                    return Ok(MINUS_INF_64);
                }
                let res = vd as i64;
                if (vd - res as f64).abs() > 0.01 {
                    *rounded = true;
                }
                Ok(res)
            }
            Value::Int(x) => Ok(rescale(*x, 0, scale, rounded)),
            Value::Decimal { v, scale: vp } => Ok(rescale(*v, *vp, scale, rounded)),
            _ => Err(StrataError::InvariantViolation(
                "numeric column expects a numeric value".into(),
            )),
        }
    }

    /// Inverse of the 1-level encoding, as bytes: dictionary lookup for
    /// lookup columns, textual rendering otherwise. TIMESTAMP applies
    /// the session timezone.
    pub fn decode_to_string(&self, code: i64) -> Result<Option<Vec<u8>>> {
        if code == NULL_VALUE_64 {
            return Ok(None);
        }
        if self.share.col_type.lookup {
            debug_assert_eq!(self.share.pack_type, PackType::Int);
            let dict = self.dict.as_ref().ok_or_else(|| {
                StrataError::InvariantViolation("lookup column without dictionary".into())
            })?;
            return Ok(dict.value(code as i32));
        }
        let kind = self.share.col_type.kind;
        let text = if kind.is_integer() {
            code.to_string()
        } else if kind.is_real() {
            format!("{}", f64::from_bits(code as u64))
        } else if kind == ColumnKind::Num {
            format_decimal(code, self.share.col_type.scale)
        } else if kind.is_temporal() {
            let secs = if kind == ColumnKind::Timestamp {
                code + self.engine.config().session_tz_offset_secs
            } else {
                code
            };
            format_datetime(secs)
        } else {
            return Ok(None);
        };
        Ok(Some(text.into_bytes()))
    }

    // --- string aggregates under a selection ---

    pub fn min_s(&self, f: &SelectionFilter) -> Result<Option<Vec<u8>>> {
        self.extreme_s(f, true)
    }

    pub fn max_s(&self, f: &SelectionFilter) -> Result<Option<Vec<u8>>> {
        self.extreme_s(f, false)
    }

    fn extreme_s(&self, f: &SelectionFilter, want_min: bool) -> Result<Option<Vec<u8>>> {
        if f.is_empty()
            || !self.share.col_type.kind.is_string_like()
            || self.hdr.nr == 0
            || self.hdr.nr == self.hdr.nn
        {
            return Ok(None);
        }
        if f.num_blocks() != self.num_packs() {
            return Err(StrataError::DataFormat {
                path: self.share.path().display().to_string(),
                details: "selection filter does not match the pack count".into(),
            });
        }

        let collation = self.share.col_type.collation;
        let mut best: Option<Vec<u8>> = None;
        let consider = |candidate: Vec<u8>, best: &mut Option<Vec<u8>>| {
            let better = match best {
                None => true,
                Some(cur) => {
                    let ord = collation_cmp(collation, &candidate, cur);
                    if want_min {
                        ord == std::cmp::Ordering::Less
                    } else {
                        ord == std::cmp::Ordering::Greater
                    }
                }
            };
            if better {
                *best = Some(candidate);
            }
        };

        for pi in 0..self.num_packs() {
            if !f.any_in_pack(pi) {
                continue;
            }
            let d = self.dpn_data(pi);
            let status = self.pack_ontological_status(pi);

            if self.share.pack_type == PackType::Int
                && (status == PackOntologicalStatus::Uniform
                    || (status == PackOntologicalStatus::UniformAndNulls && f.is_full(pi, d.nr)))
            {
                // the whole pack holds one value; decode it once
                if let Some(bytes) = self.decode_to_string(d.min)? {
                    consider(bytes, &mut best);
                }
                continue;
            }
            if d.null_only() || d.nr == 0 {
                continue;
            }

            self.lock_pack_for_use(pi)?;
            let walk = (|| -> Result<()> {
                let pack = self.pack_for_read(pi).ok_or_else(|| {
                    StrataError::InvariantViolation("pack not resident after lock".into())
                })?;
                for off in f.ones_in_pack(pi) {
                    let off = off as usize;
                    if pack.is_null(off) {
                        continue;
                    }
                    match self.share.pack_type {
                        PackType::Str => {
                            if let Some(bytes) = pack.value_binary(off) {
                                consider(bytes, &mut best);
                            }
                        }
                        PackType::Int => {
                            if let Some(code) = pack.value_int(off) {
                                if let Some(bytes) = self.decode_to_string(code)? {
                                    consider(bytes, &mut best);
                                }
                            }
                        }
                    }
                }
                Ok(())
            })();
            self.unlock_pack_from_use(pi)?;
            walk?;
        }
        Ok(best)
    }

    // --- write path ---

    /// Make the last pack appendable: allocate a fresh descriptor when
    /// the column is empty or the last pack is full, otherwise
    /// copy-on-write the last pack.
    fn prepare_pack_for_load(&mut self) -> Result<()> {
        let tx = self.writer()?;
        let full = self
            .idx
            .last()
            .map(|&si| self.share.dpn(si).snapshot().nr == 1u32 << self.share.pss)
            .unwrap_or(true);
        if full {
            let slot = self.share.alloc_dpn(tx.id, None)?;
            self.idx.push(slot);
        } else {
            self.copy_pack_for_write(self.idx.len() - 1)?;
        }
        Ok(())
    }

    /// Copy-on-write of one pack: a new descriptor seeded from the old
    /// one, the pack cloned under the new coordinate when cache-resident
    /// (no disk I/O), fetched otherwise. Readers at older versions keep
    /// the old slot.
    pub fn copy_pack_for_write(&mut self, pi: usize) -> Result<()> {
        let tx = self.writer()?;
        let old_index = self.idx[pi];
        if self.share.dpn(old_index).snapshot().local {
            return Ok(());
        }

        let new_index = self.share.alloc_dpn(tx.id, Some(old_index))?;
        self.idx[pi] = new_index;
        let new_dpn = self.share.dpn(new_index);

        let pc_old = self.pc_of_slot(old_index);
        let pc_new = self.pc(pi);

        if let Some(old_pack) = self.engine.cache.get_locked_pack(pc_old) {
            let clone = old_pack.clone_for(pc_new);
            let (slot, _new_pack) = self.engine.cache.put_pack(pc_new, clone);
            new_dpn.set_pack_slot(slot);
            old_pack.unlock();
        } else {
            let snap = new_dpn.snapshot();
            if !snap.trivial(self.share.pack_type) {
                let (slot, _pack) = self
                    .engine
                    .cache
                    .get_or_fetch_pack(pc_new, || self.fetch_pack(new_index))?;
                new_dpn.set_pack_slot(slot);
            }
        }
        Ok(())
    }

    /// Bulk-append one parsed batch.
    pub fn load_data(&mut self, vc: &ValueCache) -> Result<()> {
        self.writer()?;
        self.no_change = false;

        self.prepare_pack_for_load()?;
        let pi = self.idx.len() - 1;
        match self.share.pack_type {
            PackType::Int => self.load_data_pack_n(pi, vc)?,
            PackType::Str => self.load_data_pack_s(pi, vc)?,
        }

        let d = self.share.dpn(self.idx[pi]);
        if !d.snapshot().trivial(self.share.pack_type) {
            let pack = self.pack_for_read(pi).ok_or_else(|| {
                StrataError::InvariantViolation("loaded pack not resident".into())
            })?;
            pack.save(&self.share, d)?;
        }

        self.hdr.nr += vc.num_values() as u64;
        if !self.share.col_type.not_null {
            self.hdr.nn += vc.num_nulls() as u64;
        }
        self.hdr.natural_size += vc.summarized_size();
        Ok(())
    }

    fn load_data_pack_n(&mut self, pi: usize, vc: &ValueCache) -> Result<()> {
        let is_real = self.share.col_type.kind.is_real();
        let default: Option<i64> = if self.share.col_type.not_null {
            if self.share.col_type.kind.is_string_like() {
                Some(self.encode_string(Some(b""), true)? as i64)
            } else if is_real {
                Some(0f64.to_bits() as i64)
            } else {
                Some(0)
            }
        } else {
            None
        };

        let d = self.share.dpn(self.idx[pi]);
        let n = vc.num_values() as u32;
        let load_nulls = if default.is_some() { 0 } else { vc.num_nulls() };
        let snap = d.snapshot();

        // an all-null batch on an empty or null-only pack stays trivial
        if load_nulls == vc.num_values() && (snap.nr == 0 || snap.null_only()) {
            d.with(|x| {
                x.nr += n;
                x.nn += n;
            });
            return Ok(());
        }

        let rdefault = default.map(|v| f64::from_bits(v as u64));
        let (load_min, load_max) = if !is_real {
            let s = vc.calc_int_stats(default).ok_or_else(|| {
                StrataError::InvariantViolation("batch with data yielded no statistics".into())
            })?;
            d.with(|x| x.sum = x.sum.wrapping_add(s.sum));
            (s.min, s.max)
        } else {
            let s = vc.calc_real_stats(rdefault).ok_or_else(|| {
                StrataError::InvariantViolation("batch with data yielded no statistics".into())
            })?;
            d.with(|x| x.sum = (x.sum_f64() + s.sum).to_bits() as i64);
            (s.min.to_bits() as i64, s.max.to_bits() as i64)
        };

        let snap = d.snapshot();
        let keeps_uniform = snap.nn + load_nulls as u32 == 0
            && load_min == load_max
            && (snap.nr == 0 || (snap.min == load_min && snap.max == load_max));

        if keeps_uniform {
            d.with(|x| {
                x.min = load_min;
                x.max = load_max;
                x.nr += n;
            });
        } else {
            // materialise (also expands a so-far-uniform pack)
            let pack = self.materialize_local(pi)?;
            let mut appended_nulls = 0u32;
            for i in 0..vc.num_values() {
                let v = if is_real {
                    vc.real_at(i, rdefault).map(|f| f.to_bits() as i64)
                } else {
                    vc.int_at(i, default)
                };
                if v.is_none() {
                    appended_nulls += 1;
                }
                pack.append_int(v);
            }
            d.with(|x| {
                let had_values = x.nr > x.nn;
                if !had_values {
                    x.min = load_min;
                    x.max = load_max;
                } else if is_real {
                    if f64::from_bits(load_min as u64) < x.min_f64() {
                        x.min = load_min;
                    }
                    if f64::from_bits(load_max as u64) > x.max_f64() {
                        x.max = load_max;
                    }
                } else {
                    x.min = x.min.min(load_min);
                    x.max = x.max.max(load_max);
                }
                x.nr += n;
                x.nn += appended_nulls;
            });
        }

        // column-wide statistics; keyed off the raw batch null count
        if vc.num_nulls() != vc.num_values() {
            let snap = d.snapshot();
            if self.hdr.nr == 0 {
                self.hdr.min = snap.min;
                self.hdr.max = snap.max;
            } else if !is_real {
                self.hdr.min = self.hdr.min.min(snap.min);
                self.hdr.max = self.hdr.max.max(snap.max);
            } else {
                if snap.min_f64() < f64::from_bits(self.hdr.min as u64) {
                    self.hdr.min = snap.min;
                }
                if snap.max_f64() > f64::from_bits(self.hdr.max as u64) {
                    self.hdr.max = snap.max;
                }
            }
        }
        Ok(())
    }

    fn load_data_pack_s(&mut self, pi: usize, vc: &ValueCache) -> Result<()> {
        let not_null = self.share.col_type.not_null;
        let d = self.share.dpn(self.idx[pi]);
        let n = vc.num_values() as u32;
        let load_nulls = if not_null { 0 } else { vc.num_nulls() };
        let snap = d.snapshot();

        if load_nulls == vc.num_values() && (snap.nr == 0 || snap.null_only()) {
            d.with(|x| {
                x.nr += n;
                x.nn += n;
            });
            return Ok(());
        }

        let pack = self.materialize_local(pi)?;
        let collation = self.share.col_type.collation;

        let mut appended_nulls = 0u32;
        let mut bytes_total = 0u64;
        let mut bmin: Option<Vec<u8>> = None;
        let mut bmax: Option<Vec<u8>> = None;
        for i in 0..vc.num_values() {
            let v = match vc.str_at(i) {
                Some(b) => Some(b),
                None if not_null => Some(&b""[..]),
                None => None,
            };
            match v {
                Some(b) => {
                    bytes_total += b.len() as u64;
                    if bmin
                        .as_deref()
                        .map(|m| collation_cmp(collation, b, m).is_lt())
                        .unwrap_or(true)
                    {
                        bmin = Some(b.to_vec());
                    }
                    if bmax
                        .as_deref()
                        .map(|m| collation_cmp(collation, b, m).is_gt())
                        .unwrap_or(true)
                    {
                        bmax = Some(b.to_vec());
                    }
                }
                None => appended_nulls += 1,
            }
            pack.append_str(v);
        }

        d.with(|x| {
            let had_values = x.nr > x.nn;
            if let (Some(bmin), Some(bmax)) = (&bmin, &bmax) {
                let pmin = prefix8(bmin);
                let pmax = prefix8(bmax);
                if !had_values {
                    x.set_min_bytes(pmin);
                    x.set_max_bytes(pmax);
                } else {
                    if pmin < x.min_bytes() {
                        x.set_min_bytes(pmin);
                    }
                    if pmax > x.max_bytes() {
                        x.set_max_bytes(pmax);
                    }
                }
            }
            x.nr += n;
            x.nn += appended_nulls;
            x.sum = x.sum.wrapping_add(bytes_total as i64);
        });
        Ok(())
    }

    /// Point update of one row. The pack is pinned for the duration, the
    /// key index is consulted first, then the pack goes through
    /// copy-on-write and the descriptor and column statistics are
    /// refreshed.
    pub fn update_data(&mut self, row: u64, v: Value) -> Result<()> {
        self.writer()?;
        self.no_change = false;

        let pi = self.row2pack(row);
        self.lock_pack_for_use(pi)?;
        let res = self.update_data_locked(row, v);
        let unlocked = self.unlock_pack_from_use(pi);
        res?;
        unlocked
    }

    fn update_data_locked(&mut self, row: u64, v: Value) -> Result<()> {
        let pi = self.row2pack(row);
        let offset = self.row2offset(row);

        self.update_if_index(row, &v)?;
        self.copy_pack_for_write(pi)?;

        let before = self.share.dpn(self.idx[pi]).snapshot();
        let pack = self.materialize_local(pi)?;

        // lookup columns encode the new string, cloning the dictionary
        // when the value is new
        let v = if self.share.col_type.lookup && !v.is_null() {
            match v {
                Value::Bytes(b) => {
                    let code = self.encode_string(Some(&b), true)?;
                    Value::Int(code as i64)
                }
                other => other,
            }
        } else {
            v
        };

        let d = self.share.dpn(self.idx[pi]);
        let is_real = self.share.col_type.kind.is_real();
        match self.share.pack_type {
            PackType::Int => {
                let code = match &v {
                    Value::Null => None,
                    Value::Int(x) | Value::DateTime(x) => Some(*x),
                    Value::Decimal { v, .. } => Some(*v),
                    Value::Real(dv) => Some(dv.to_bits() as i64),
                    Value::Bytes(_) => {
                        return Err(StrataError::BadPackType(
                            "raw bytes into a numeric pack".into(),
                        ))
                    }
                };
                let old = pack.set_int(offset, code);
                d.with(|x| {
                    match (old.is_some(), code.is_some()) {
                        (true, false) => x.nn += 1,
                        (false, true) => x.nn -= 1,
                        _ => {}
                    }
                    if let Some(c) = code {
                        let had_values = before.nr > before.nn;
                        if !had_values {
                            x.min = c;
                            x.max = c;
                        } else if is_real {
                            if f64::from_bits(c as u64) < x.min_f64() {
                                x.min = c;
                            }
                            if f64::from_bits(c as u64) > x.max_f64() {
                                x.max = c;
                            }
                        } else {
                            x.min = x.min.min(c);
                            x.max = x.max.max(c);
                        }
                    }
                    x.synced = false;
                });
            }
            PackType::Str => {
                let bytes = match &v {
                    Value::Null => None,
                    Value::Bytes(b) => Some(b.as_slice()),
                    _ => {
                        return Err(StrataError::BadPackType(
                            "non-string value into a string pack".into(),
                        ))
                    }
                };
                let old = pack.set_str(offset, bytes);
                d.with(|x| {
                    match (old.is_some(), bytes.is_some()) {
                        (true, false) => x.nn += 1,
                        (false, true) => x.nn -= 1,
                        _ => {}
                    }
                    if let Some(b) = bytes {
                        let p = prefix8(b);
                        let had_values = before.nr > before.nn;
                        if !had_values {
                            x.set_min_bytes(p);
                            x.set_max_bytes(p);
                        } else {
                            if p < x.min_bytes() {
                                x.set_min_bytes(p);
                            }
                            if p > x.max_bytes() {
                                x.set_max_bytes(p);
                            }
                        }
                        if let Some(old_b) = &old {
                            x.sum = x
                                .sum
                                .wrapping_add(b.len() as i64)
                                .wrapping_sub(old_b.len() as i64);
                        } else {
                            x.sum = x.sum.wrapping_add(b.len() as i64);
                        }
                    } else if let Some(old_b) = &old {
                        x.sum = x.sum.wrapping_sub(old_b.len() as i64);
                    }
                    x.synced = false;
                });
            }
        }

        // column-wide null count follows the pack delta
        let after = d.snapshot();
        self.hdr.nn = self.hdr.nn - before.nn as u64 + after.nn as u64;

        // column-wide min/max: widen directly, recompute when the update
        // may have narrowed the range
        if self.share.pack_type == PackType::Int {
            self.refresh_global_minmax(after, is_real);
        }
        Ok(())
    }

    fn refresh_global_minmax(&mut self, changed: DpnData, is_real: bool) {
        let lt = |a: i64, b: i64| {
            if is_real {
                f64::from_bits(a as u64) < f64::from_bits(b as u64)
            } else {
                a < b
            }
        };

        if lt(changed.min, self.hdr.min) {
            self.hdr.min = changed.min;
        } else {
            let mut min: Option<i64> = None;
            for pi in 0..self.num_packs() {
                let d = self.dpn_data(pi);
                if d.null_only() {
                    continue;
                }
                min = Some(match min {
                    None => d.min,
                    Some(cur) => {
                        if lt(d.min, cur) {
                            d.min
                        } else {
                            cur
                        }
                    }
                });
            }
            if let Some(m) = min {
                self.hdr.min = m;
            }
        }

        if lt(self.hdr.max, changed.max) {
            self.hdr.max = changed.max;
        } else {
            let mut max: Option<i64> = None;
            for pi in 0..self.num_packs() {
                let d = self.dpn_data(pi);
                if d.null_only() {
                    continue;
                }
                max = Some(match max {
                    None => d.max,
                    Some(cur) => {
                        if lt(cur, d.max) {
                            d.max
                        } else {
                            cur
                        }
                    }
                });
            }
            if let Some(m) = max {
                self.hdr.max = m;
            }
        }
    }

    /// Route a key-column update through the table's primary-key index.
    fn update_if_index(&mut self, row: u64, v: &Value) -> Result<()> {
        let table_path = self
            .share
            .path()
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| self.share.path().to_path_buf());
        let Some(index) = self.engine.table_index(&table_path) else {
            return Ok(());
        };
        if !index.key_cols().contains(&self.column_id) {
            return Ok(());
        }
        if v.is_null() {
            return Err(StrataError::InvariantViolation(
                "primary key does not accept null".into(),
            ));
        }
        let tx = self.writer()?;

        let (new_key, old_key, display): (Vec<u8>, Vec<u8>, String) =
            if self.share.pack_type == PackType::Str {
                let new = v
                    .as_bytes()
                    .ok_or_else(|| {
                        StrataError::BadPackType("string key expects raw bytes".into())
                    })?
                    .to_vec();
                let old = self.value_string(row)?.unwrap_or_default();
                let display = String::from_utf8_lossy(&new).into_owned();
                (new, old, display)
            } else {
                let new = match v {
                    Value::Bytes(b) => {
                        // lookup key columns compare by decoded value
                        b.clone()
                    }
                    other => {
                        let x = other.as_int().or_else(|| match other {
                            Value::Real(d) => Some(d.to_bits() as i64),
                            Value::Decimal { v, .. } => Some(*v),
                            _ => None,
                        });
                        let x = x.ok_or_else(|| {
                            StrataError::BadPackType("numeric key expects a numeric value".into())
                        })?;
                        x.to_le_bytes().to_vec()
                    }
                };
                let old_code = self.value_int64(row)?;
                let old = old_code.to_le_bytes().to_vec();
                (new.clone(), old, format!("{:?}", new))
            };

        match index.update_index(tx.id, &new_key, &old_key, row) {
            crate::index::IndexCode::Ok => Ok(()),
            crate::index::IndexCode::DupKey | crate::index::IndexCode::Failed => {
                debug!("duplicate key on row {row}");
                Err(StrataError::DuplicateKey(display))
            }
        }
    }

    // --- rough-set filter maintenance ---

    fn filters_enabled(&self) -> bool {
        self.engine.config().enable_filters
    }

    fn load_or_new_hist(&self) -> Result<HistFilter> {
        let path = filter_path(&self.share.filter_dir(), FilterType::Hist, self.version);
        if path.exists() {
            HistFilter::load(&path)
        } else {
            Ok(HistFilter::new(self.idx.len()))
        }
    }

    fn load_or_new_cmap(&self) -> Result<CmapFilter> {
        let path = filter_path(&self.share.filter_dir(), FilterType::Cmap, self.version);
        if path.exists() {
            CmapFilter::load(&path)
        } else {
            Ok(CmapFilter::new(self.idx.len()))
        }
    }

    fn load_or_new_bloom(&self) -> Result<BloomPackFilter> {
        let path = filter_path(&self.share.filter_dir(), FilterType::Bloom, self.version);
        if path.exists() {
            BloomPackFilter::load(&path)
        } else {
            Ok(BloomPackFilter::new(self.idx.len()))
        }
    }

    /// Reader-side filter access through the shared cache.
    pub fn reader_filter(&self, kind: FilterType) -> Result<Option<Arc<ColumnFilter>>> {
        if !self.filters_enabled() {
            return Ok(None);
        }
        let present = match kind {
            FilterType::Hist => self.share.has_filter_hist,
            FilterType::Cmap => self.share.has_filter_cmap,
            FilterType::Bloom => self.share.has_filter_bloom,
        };
        if !present {
            return Ok(None);
        }
        let coord = FilterCoordinate {
            table: self.table_id,
            column: self.column_id,
            kind,
            xid: self.version,
        };
        let filter_dir = self.share.filter_dir();
        let np = self.idx.len();
        let version = self.version;
        self.engine
            .filter_cache
            .get(coord, || {
                let path = filter_path(&filter_dir, kind, version);
                if path.exists() {
                    ColumnFilter::load(&filter_dir, kind, version)
                } else {
                    Ok(match kind {
                        FilterType::Hist => ColumnFilter::Hist(HistFilter::new(np)),
                        FilterType::Cmap => ColumnFilter::Cmap(CmapFilter::new(np)),
                        FilterType::Bloom => ColumnFilter::Bloom(BloomPackFilter::new(np)),
                    })
                }
            })
            .map(Some)
    }

    fn update_rsi_hist(&mut self, pi: usize) -> Result<()> {
        if !self.filters_enabled() || !self.share.has_filter_hist || self.hdr.nr == 0 {
            return Ok(());
        }
        let d = self.dpn_data(pi);
        if d.trivial(self.share.pack_type) {
            return Ok(());
        }
        if self.filter_hist.is_none() {
            self.filter_hist = Some(self.load_or_new_hist()?);
        }
        let pack = self.pack_for_read(pi).ok_or_else(|| {
            StrataError::InvariantViolation("filter refresh on a non-resident pack".into())
        })?;
        self.filter_hist
            .as_mut()
            .expect("hist filter materialised")
            .update(pi, &d, &pack);
        Ok(())
    }

    fn update_rsi_cmap(&mut self, pi: usize) -> Result<()> {
        if !self.filters_enabled() || !self.share.has_filter_cmap || self.hdr.nr == 0 {
            return Ok(());
        }
        let d = self.dpn_data(pi);
        if d.null_only() {
            return Ok(());
        }
        if self.filter_cmap.is_none() {
            self.filter_cmap = Some(self.load_or_new_cmap()?);
        }
        let pack = self.pack_for_read(pi).ok_or_else(|| {
            StrataError::InvariantViolation("filter refresh on a non-resident pack".into())
        })?;
        self.filter_cmap
            .as_mut()
            .expect("cmap filter materialised")
            .update(pi, &pack);
        Ok(())
    }

    fn update_rsi_bloom(&mut self, pi: usize) -> Result<()> {
        if !self.filters_enabled() || !self.share.has_filter_bloom || self.hdr.nr == 0 {
            return Ok(());
        }
        let d = self.dpn_data(pi);
        if d.null_only() {
            return Ok(());
        }
        if self.filter_bloom.is_none() {
            self.filter_bloom = Some(self.load_or_new_bloom()?);
        }
        let pack = self.pack_for_read(pi).ok_or_else(|| {
            StrataError::InvariantViolation("filter refresh on a non-resident pack".into())
        })?;
        self.filter_bloom
            .as_mut()
            .expect("bloom filter materialised")
            .update(pi, &pack);
        Ok(())
    }

    fn refresh_filter(&mut self, pi: usize) -> Result<()> {
        self.update_rsi_bloom(pi)?;
        self.update_rsi_cmap(pi)?;
        self.update_rsi_hist(pi)
    }

    /// Persist held filters under the writer's id and release them.
    fn save_filters(&mut self, tx: TxId) -> Result<()> {
        let dir = self.share.filter_dir();
        if let Some(f) = self.filter_hist.take() {
            f.save(&filter_path(&dir, FilterType::Hist, tx))?;
        }
        if let Some(f) = self.filter_cmap.take() {
            f.save(&filter_path(&dir, FilterType::Cmap, tx))?;
        }
        if let Some(f) = self.filter_bloom.take() {
            f.save(&filter_path(&dir, FilterType::Bloom, tx))?;
        }
        Ok(())
    }

    // --- save / commit pipeline ---

    /// PREPARE: flush everything this transaction changed and write the
    /// new snapshot file. Returns false when nothing changed.
    pub fn save_version(&mut self) -> Result<bool> {
        let tx = self.writer()?;

        for pi in 0..self.idx.len() {
            let si = self.idx[pi];
            let snap = self.share.dpn(si).snapshot();
            if !snap.local {
                continue;
            }
            self.no_change = false;
            self.refresh_filter(pi)?;

            let d = self.share.dpn(si);
            let snap = d.snapshot();
            if snap.trivial(self.share.pack_type) || snap.synced {
                // trivial, or the on-disk image already matches
                if let Some(slot) = d.pack_slot() {
                    if let Some(pack) = self.engine.cache.pack_by_slot(slot) {
                        pack.unlock();
                    }
                    self.engine.cache.drop_pack(self.pc(pi));
                    d.set_pack_ptr_raw(0);
                }
            } else {
                let pack = self.pack_for_read(pi).ok_or_else(|| {
                    StrataError::InvariantViolation("dirty pack not resident".into())
                })?;
                pack.save(&self.share, d)?;
                pack.unlock();
                d.set_pack_ptr_raw(0);
            }
            self.share.save_dpn(si)?;
        }

        if self.no_change {
            return Ok(false);
        }

        if !self.idx.is_empty() {
            self.save_filters(tx.id)?;

            if let Some(dict) = &self.dict {
                if dict.changed() {
                    dict.save(&self.share.dict_dir().join(self.hdr.dict_ver.to_string()))?;
                }
            }

            self.hdr.unique = self.unique;
            self.hdr.unique_updated = self.unique_updated;
            self.hdr.np = self.idx.len() as u32;
            self.hdr.compressed_size = self
                .idx
                .iter()
                .map(|&si| {
                    let d = self.share.dpn(si).snapshot();
                    if d.addr != INVALID_ADDR {
                        d.len as u64
                    } else {
                        0
                    }
                })
                .sum();
        }

        let path = self.share.version_dir().join(tx.id.file_name());
        write_snapshot(&path, &self.hdr, &self.idx, self.engine.config().sync_buffers)?;
        debug!(
            "saved version {} for column {} ({} packs)",
            tx.id, self.column_id, self.hdr.np
        );
        Ok(true)
    }

    /// PUBLISH: make the prepared version visible. Local descriptors
    /// lose their `local` flag, their copy-on-write predecessors get
    /// `xmax` stamped with the committing id, and the previous version's
    /// files are queued for deferred removal.
    pub fn post_commit(&mut self) -> Result<()> {
        let Some(tx) = self.tx else {
            return Ok(());
        };

        if !self.no_change {
            self.engine.advance_max_xid(tx.id);
            let max_xid = self.engine.max_xid();

            for pi in 0..self.idx.len() {
                let si = self.idx[pi];
                let d = self.share.dpn(si);
                let snap = d.snapshot();
                if !snap.local {
                    continue;
                }
                d.with(|x| x.local = false);
                self.share.save_dpn(si)?;
                if snap.base != INVALID_PACK_INDEX {
                    let base = self.share.dpn(snap.base);
                    base.with(|x| x.xmax = max_xid);
                    self.share.save_dpn(snap.base)?;
                }
            }

            let old_version = self.version;
            self.engine.defer_remove(
                self.share.version_dir().join(old_version.file_name()),
                self.table_id,
            );
            let filter_dir = self.share.filter_dir();
            if self.share.has_filter_bloom {
                self.engine.defer_remove(
                    filter_path(&filter_dir, FilterType::Bloom, old_version),
                    self.table_id,
                );
            }
            if self.share.has_filter_cmap {
                self.engine.defer_remove(
                    filter_path(&filter_dir, FilterType::Cmap, old_version),
                    self.table_id,
                );
            }
            if self.share.has_filter_hist {
                self.engine.defer_remove(
                    filter_path(&filter_dir, FilterType::Hist, old_version),
                    self.table_id,
                );
            }
            self.engine
                .filter_cache
                .drop_version(self.table_id, self.column_id, old_version);

            self.version = tx.id;
        }
        self.tx = None;
        Ok(())
    }

    /// Abandon the transaction: evict local packs, reset and reclaim
    /// local descriptor slots. The attribute is not usable afterwards.
    pub fn rollback(&mut self) {
        for pi in 0..self.idx.len() {
            let si = self.idx[pi];
            if self.share.dpn(si).snapshot().local {
                self.engine.cache.drop_pack(self.pc(pi));
                self.share.release_dpn(si);
            }
        }
        self.filter_hist = None;
        self.filter_cmap = None;
        self.filter_bloom = None;
        self.tx = None;
    }

    /// Drop every pack and reset the header; lookup columns restart
    /// their dictionary at version 1.
    pub fn truncate(&mut self) -> Result<()> {
        self.writer()?;
        self.no_change = false;
        self.hdr = ColumnVersionHeader::default();
        if self.share.col_type.lookup {
            self.hdr.dict_ver = 1;
            let dict = Arc::new(Dictionary::new(self.share.col_type.precision));
            dict.save(&self.share.dict_dir().join("1"))?;
            self.engine.cache.put_dict(
                DictCoordinate {
                    table: self.table_id,
                    column: self.column_id,
                    ver: 1,
                },
                dict.clone(),
            );
            self.dict = Some(dict);
        }
        self.idx.clear();
        Ok(())
    }

    /// Drop an unchanged dictionary reference so the cache can evict it.
    pub fn release(&mut self) {
        if let Some(dict) = &self.dict {
            if !dict.changed() {
                self.dict = None;
            }
        }
    }
}

/// First 8 bytes, zero padded: the inlined descriptor prefix form.
fn prefix8(bytes: &[u8]) -> [u8; 8] {
    let mut p = [0u8; 8];
    let n = bytes.len().min(8);
    p[..n].copy_from_slice(&bytes[..n]);
    p
}

/// Strip the zero padding of an inlined prefix.
fn trim_prefix(prefix: [u8; 8]) -> Vec<u8> {
    let end = prefix.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    prefix[..end].to_vec()
}

/// Rescale a fixed-point value from scale `from` to scale `to`, clamping
/// to the infinity sentinels and reporting lossy round-down.
fn rescale(mut v: i64, mut from: u8, to: u8, rounded: &mut bool) -> i64 {
    while from < to {
        if v < MINUS_INF_64 / 10 {
            return MINUS_INF_64;
        }
        if v > PLUS_INF_64 / 10 {
            return PLUS_INF_64;
        }
        v *= 10;
        from += 1;
    }
    while from > to {
        if v % 10 != 0 {
            *rounded = true;
        }
        v /= 10;
        from -= 1;
    }
    v
}

/// Leading integer parse of a numeric literal; stops at the first
/// non-digit.
fn parse_i64(bytes: &[u8]) -> i64 {
    let s = bytes;
    let mut i = 0;
    while i < s.len() && s[i].is_ascii_whitespace() {
        i += 1;
    }
    let neg = i < s.len() && s[i] == b'-';
    if neg || (i < s.len() && s[i] == b'+') {
        i += 1;
    }
    let mut v: i64 = 0;
    while i < s.len() && s[i].is_ascii_digit() {
        v = v.saturating_mul(10).saturating_add((s[i] - b'0') as i64);
        i += 1;
    }
    if neg {
        -v
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_up_and_down() {
        let mut rounded = false;
        assert_eq!(rescale(5, 0, 2, &mut rounded), 500);
        assert!(!rounded);

        assert_eq!(rescale(123, 2, 0, &mut rounded), 1);
        assert!(rounded, "1.23 truncated to 1");

        rounded = false;
        assert_eq!(rescale(100, 2, 0, &mut rounded), 1);
        assert!(!rounded, "1.00 is exact");
    }

    #[test]
    fn test_rescale_clamps() {
        let mut rounded = false;
        assert_eq!(rescale(i64::MAX / 2, 0, 3, &mut rounded), PLUS_INF_64);
        assert_eq!(rescale(i64::MIN / 2, 0, 3, &mut rounded), MINUS_INF_64);
    }

    #[test]
    fn test_parse_i64() {
        assert_eq!(parse_i64(b"123"), 123);
        assert_eq!(parse_i64(b"  -42xyz"), -42);
        assert_eq!(parse_i64(b"+7"), 7);
        assert_eq!(parse_i64(b""), 0);
    }

    #[test]
    fn test_prefix8_roundtrip() {
        assert_eq!(trim_prefix(prefix8(b"alpha")), b"alpha".to_vec());
        assert_eq!(trim_prefix(prefix8(b"very long string")), b"very lon".to_vec());
        assert_eq!(trim_prefix(prefix8(b"")), Vec::<u8>::new());
    }
}
