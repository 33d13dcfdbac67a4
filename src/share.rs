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

//! Per-column shared state
//!
//! The `ColumnShare` owns what every transaction on a column sees: the
//! descriptor arena backed by the DN file, the slot freelist, the DATA
//! payload heap and the immutable type metadata. Writers mutate only the
//! descriptors they allocated; visibility is always by slot index, so
//! older snapshots stay valid while new versions are built.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::dictionary::Dictionary;
use crate::dpn::{Dpn, DpnData, DPN_DISK_SIZE};
use crate::error::{Result, StrataError};
use crate::meta::{
    write_snapshot, ColumnMeta, ColumnVersionHeader, COL_DATA_FILE, COL_DICT_DIR, COL_DN_FILE,
    COL_FILTER_BLOOM_DIR, COL_FILTER_CMAP_DIR, COL_FILTER_DIR, COL_FILTER_HIST_DIR, COL_META_FILE,
    COL_VERSION_DIR,
};
use crate::txid::{TxId, MAX_XID};
use crate::types::{ColumnType, PackType, INVALID_PACK_INDEX};

/// Descriptor slots per column.
pub const COL_DN_CAPACITY: usize = 8192;
/// Pre-sized length of the DN file.
pub const COL_DN_FILE_SIZE: u64 = (COL_DN_CAPACITY * DPN_DISK_SIZE) as u64;

/// Shared per-column state.
pub struct ColumnShare {
    pub table_id: u32,
    pub column_id: u32,
    path: PathBuf,
    pub meta: ColumnMeta,
    pub col_type: ColumnType,
    pub pss: u8,
    pub pack_type: PackType,
    pub has_filter_hist: bool,
    pub has_filter_cmap: bool,
    pub has_filter_bloom: bool,
    dpns: Box<[Dpn]>,
    free: Mutex<Vec<u32>>,
    dn_file: Mutex<File>,
    data_file: Mutex<File>,
    data_end: AtomicU64,
}

impl ColumnShare {
    /// Create a column on disk: META, DN, DATA, the initial snapshot
    /// under `TxId(0, 0)`, the dictionary (lookup columns) and the
    /// filter directories. `no_rows` pre-existing rows become null-only
    /// trivial packs.
    pub fn create(dir: &Path, ctype: &ColumnType, pss: u8, no_rows: u64) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let pack_rows = 1u64 << pss;
        let no_pack = no_rows.div_ceil(pack_rows) as u32;

        let meta = ColumnMeta::new(ctype, pss);
        meta.save(&dir.join(COL_META_FILE))?;

        let mut hdr = ColumnVersionHeader {
            nr: no_rows,
            nn: no_rows,
            np: no_pack,
            ..Default::default()
        };

        if ctype.lookup {
            // dictionary versions start at 1; 0 means "no dictionary"
            hdr.dict_ver = 1;
            std::fs::create_dir_all(dir.join(COL_DICT_DIR))?;
            let dict = Dictionary::new(ctype.precision);
            dict.save(&dir.join(COL_DICT_DIR).join("1"))?;
        }

        std::fs::create_dir_all(dir.join(COL_VERSION_DIR))?;
        let idx: Vec<u32> = (0..no_pack).collect();
        write_snapshot(
            &dir.join(COL_VERSION_DIR).join(TxId::default().file_name()),
            &hdr,
            &idx,
            true,
        )?;

        let mut dn = File::create(dir.join(COL_DN_FILE))?;
        if no_rows > 0 {
            let mut dpn = DpnData {
                used: true,
                nr: pack_rows as u32,
                nn: pack_rows as u32,
                xmax: MAX_XID,
                ..Default::default()
            };
            let mut buf = [0u8; DPN_DISK_SIZE];
            for _ in 0..no_pack - 1 {
                dpn.write_to(&mut buf);
                dn.write_all(&buf)?;
            }
            let left = no_rows % pack_rows;
            if left != 0 {
                dpn.nr = left as u32;
                dpn.nn = left as u32;
            }
            dpn.write_to(&mut buf);
            dn.write_all(&buf)?;
        }
        dn.set_len(COL_DN_FILE_SIZE)?;
        dn.sync_all()?;

        File::create(dir.join(COL_DATA_FILE))?;

        let filters = dir.join(COL_FILTER_DIR);
        std::fs::create_dir_all(filters.join(COL_FILTER_BLOOM_DIR))?;
        std::fs::create_dir_all(filters.join(COL_FILTER_CMAP_DIR))?;
        std::fs::create_dir_all(filters.join(COL_FILTER_HIST_DIR))?;

        info!(
            "created column at {} ({no_rows} rows, {no_pack} packs)",
            dir.display()
        );
        Ok(())
    }

    /// Open the shared state of an existing column.
    pub fn open(dir: &Path, table_id: u32, column_id: u32) -> Result<Arc<Self>> {
        let meta = ColumnMeta::load(&dir.join(COL_META_FILE))?;
        let col_type = meta.column_type();
        let pack_type = col_type.pack_type();

        let mut dn_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join(COL_DN_FILE))?;

        let dpns: Box<[Dpn]> = (0..COL_DN_CAPACITY).map(|_| Dpn::new()).collect();
        let mut free = Vec::new();

        let mut bytes = Vec::new();
        dn_file.read_to_end(&mut bytes)?;
        for slot in (0..COL_DN_CAPACITY).rev() {
            let off = slot * DPN_DISK_SIZE;
            if off + DPN_DISK_SIZE <= bytes.len() {
                let data = DpnData::read_from(&bytes[off..off + DPN_DISK_SIZE]);
                if data.used {
                    dpns[slot].replace(data);
                    continue;
                }
            }
            free.push(slot as u32);
        }

        let mut data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join(COL_DATA_FILE))?;
        let data_end = data_file.seek(SeekFrom::End(0))?;

        let has_filter_hist = pack_type == PackType::Int && !col_type.kind.is_real();
        let has_filter_cmap =
            pack_type == PackType::Str && !col_type.collation.requires_transform();
        let has_filter_bloom = pack_type == PackType::Str;

        debug!(
            "opened column share {} (free slots: {})",
            dir.display(),
            free.len()
        );

        Ok(Arc::new(Self {
            table_id,
            column_id,
            path: dir.to_path_buf(),
            meta,
            col_type,
            pss: meta.pss,
            pack_type,
            has_filter_hist,
            has_filter_cmap,
            has_filter_bloom,
            dpns,
            free: Mutex::new(free),
            dn_file: Mutex::new(dn_file),
            data_file: Mutex::new(data_file),
            data_end: AtomicU64::new(data_end),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version_dir(&self) -> PathBuf {
        self.path.join(COL_VERSION_DIR)
    }

    pub fn dict_dir(&self) -> PathBuf {
        self.path.join(COL_DICT_DIR)
    }

    pub fn filter_dir(&self) -> PathBuf {
        self.path.join(COL_FILTER_DIR)
    }

    /// The descriptor in slot `index`.
    pub fn dpn(&self, index: u32) -> &Dpn {
        &self.dpns[index as usize]
    }

    /// Allocate a descriptor slot for a writer. With a `seed`, the new
    /// descriptor inherits the seed's statistics and payload address and
    /// records the seed as its copy-on-write base.
    pub fn alloc_dpn(&self, xid: TxId, seed: Option<u32>) -> Result<u32> {
        let slot = self.free.lock().pop().ok_or_else(|| {
            StrataError::InvariantViolation(format!(
                "descriptor arena exhausted at {}",
                self.path.display()
            ))
        })?;

        let mut data = match seed {
            Some(base) => {
                let mut d = self.dpn(base).snapshot();
                d.base = base;
                d
            }
            None => DpnData::default(),
        };
        data.used = true;
        data.local = true;
        data.xmin = xid;
        data.xmax = MAX_XID;
        if seed.is_none() {
            data.base = INVALID_PACK_INDEX;
        }

        let dpn = self.dpn(slot);
        dpn.replace(data);
        dpn.set_pack_ptr_raw(0);
        Ok(slot)
    }

    /// Return a never-published slot to the freelist (rollback).
    pub fn release_dpn(&self, slot: u32) {
        self.dpn(slot).reset();
        self.free.lock().push(slot);
    }

    /// Persist one descriptor record into the DN file.
    pub fn save_dpn(&self, slot: u32) -> Result<()> {
        let data = self.dpn(slot).snapshot();
        let mut buf = [0u8; DPN_DISK_SIZE];
        data.write_to(&mut buf);

        let mut f = self.dn_file.lock();
        f.seek(SeekFrom::Start(slot as u64 * DPN_DISK_SIZE as u64))?;
        f.write_all(&buf)?;
        Ok(())
    }

    /// Append a pack payload to the DATA heap; returns its address.
    pub fn append_data(&self, bytes: &[u8]) -> Result<u64> {
        let mut f = self.data_file.lock();
        let addr = self.data_end.load(Ordering::Acquire);
        f.seek(SeekFrom::Start(addr))?;
        f.write_all(bytes)?;
        self.data_end
            .store(addr + bytes.len() as u64, Ordering::Release);
        Ok(addr)
    }

    /// Read a pack payload back from the DATA heap.
    pub fn read_data(&self, addr: u64, len: u32) -> Result<Vec<u8>> {
        let mut f = self.data_file.lock();
        f.seek(SeekFrom::Start(addr))?;
        let mut buf = vec![0u8; len as usize];
        f.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn free_slots(&self) -> usize {
        self.free.lock().len()
    }
}
