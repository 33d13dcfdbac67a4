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

//! Rough-set filters
//!
//! Per-pack auxiliary indexes used to skip packs that cannot match a
//! predicate:
//!
//! - `hist`: value histogram for numeric packs
//! - `cmap`: character occurrence map for string packs under binary
//!   collation
//! - `bloom`: membership filter for string packs
//!
//! A writable attribute materialises its own filter instances and
//! persists them under its transaction id in `SaveFilters`; readers share
//! instances through the [`FilterCache`], keyed by
//! `(table, column, kind, version)`.

pub mod bloom;
pub mod cmap;
pub mod hist;

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::meta::{COL_FILTER_BLOOM_DIR, COL_FILTER_CMAP_DIR, COL_FILTER_HIST_DIR};
use crate::txid::TxId;

pub use bloom::BloomPackFilter;
pub use cmap::CmapFilter;
pub use hist::HistFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterType {
    Hist,
    Cmap,
    Bloom,
}

impl FilterType {
    pub fn dir_name(self) -> &'static str {
        match self {
            FilterType::Hist => COL_FILTER_HIST_DIR,
            FilterType::Cmap => COL_FILTER_CMAP_DIR,
            FilterType::Bloom => COL_FILTER_BLOOM_DIR,
        }
    }
}

/// Identifies one persisted filter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterCoordinate {
    pub table: u32,
    pub column: u32,
    pub kind: FilterType,
    pub xid: TxId,
}

/// Path of a filter snapshot inside a column's FILTERS directory.
pub fn filter_path(filter_dir: &Path, kind: FilterType, xid: TxId) -> PathBuf {
    filter_dir.join(kind.dir_name()).join(xid.file_name())
}

/// One loaded filter of any kind.
#[derive(Debug)]
pub enum ColumnFilter {
    Hist(HistFilter),
    Cmap(CmapFilter),
    Bloom(BloomPackFilter),
}

impl ColumnFilter {
    pub fn kind(&self) -> FilterType {
        match self {
            ColumnFilter::Hist(_) => FilterType::Hist,
            ColumnFilter::Cmap(_) => FilterType::Cmap,
            ColumnFilter::Bloom(_) => FilterType::Bloom,
        }
    }

    pub fn as_hist(&self) -> Result<&HistFilter> {
        match self {
            ColumnFilter::Hist(f) => Ok(f),
            other => Err(StrataError::BadFilterType(format!(
                "expected hist, found {:?}",
                other.kind()
            ))),
        }
    }

    pub fn as_cmap(&self) -> Result<&CmapFilter> {
        match self {
            ColumnFilter::Cmap(f) => Ok(f),
            other => Err(StrataError::BadFilterType(format!(
                "expected cmap, found {:?}",
                other.kind()
            ))),
        }
    }

    pub fn as_bloom(&self) -> Result<&BloomPackFilter> {
        match self {
            ColumnFilter::Bloom(f) => Ok(f),
            other => Err(StrataError::BadFilterType(format!(
                "expected bloom, found {:?}",
                other.kind()
            ))),
        }
    }

    /// Load a filter snapshot of the given kind.
    pub fn load(filter_dir: &Path, kind: FilterType, xid: TxId) -> Result<Self> {
        let path = filter_path(filter_dir, kind, xid);
        Ok(match kind {
            FilterType::Hist => ColumnFilter::Hist(HistFilter::load(&path)?),
            FilterType::Cmap => ColumnFilter::Cmap(CmapFilter::load(&path)?),
            FilterType::Bloom => ColumnFilter::Bloom(BloomPackFilter::load(&path)?),
        })
    }
}

/// Cache of reader-shared filter instances.
#[derive(Debug, Default)]
pub struct FilterCache {
    map: DashMap<FilterCoordinate, Arc<ColumnFilter>>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        coord: FilterCoordinate,
        creator: impl FnOnce() -> Result<ColumnFilter>,
    ) -> Result<Arc<ColumnFilter>> {
        if let Some(f) = self.map.get(&coord) {
            return Ok(Arc::clone(f.value()));
        }
        let filter = Arc::new(creator()?);
        self.map.insert(coord, filter.clone());
        Ok(filter)
    }

    /// Drop every cached instance of an obsolete version.
    pub fn drop_version(&self, table: u32, column: u32, xid: TxId) {
        self.map
            .retain(|c, _| !(c.table == table && c.column == column && c.xid == xid));
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Shared serialisation helper: magic + body + blake3 checksum.
pub(crate) fn write_filter_file(path: &Path, magic: u32, body: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut buf = Vec::with_capacity(4 + body.len() + 32);
    buf.extend_from_slice(&magic.to_le_bytes());
    buf.extend_from_slice(body);
    let checksum = blake3::hash(&buf);
    buf.extend_from_slice(checksum.as_bytes());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    f.write_all(&buf)?;
    f.sync_all()?;
    Ok(())
}

/// Inverse of [`write_filter_file`]; returns the body.
pub(crate) fn read_filter_file(path: &Path, magic: u32) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < 4 + 32 {
        return Err(StrataError::DataFormat {
            path: path.display().to_string(),
            details: "filter file too small".into(),
        });
    }
    let (data, stored) = bytes.split_at(bytes.len() - 32);
    if blake3::hash(data).as_bytes() != stored {
        return Err(StrataError::Corruption(format!(
            "filter checksum mismatch in {}",
            path.display()
        )));
    }
    let found = u32::from_le_bytes(data[0..4].try_into().unwrap());
    if found != magic {
        return Err(StrataError::DataFormat {
            path: path.display().to_string(),
            details: format!("bad filter magic {found:#x}"),
        });
    }
    Ok(data[4..].to_vec())
}
