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

//! Engine-level shared state
//!
//! One `Engine` per process: the pack and filter caches, the committed
//! transaction-id high-water mark, the deferred-removal queue for
//! obsolete version files, and the registry of table indexes. Attributes
//! hold an `Arc<Engine>` and go through it for everything process-wide.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::PackCache;
use crate::error::Result;
use crate::filter::FilterCache;
use crate::index::TableIndex;
use crate::txid::TxId;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fsync snapshot files after writing.
    pub sync_buffers: bool,
    /// Gate all rough-set filter materialisation.
    pub enable_filters: bool,
    /// Pack cache capacity in packs.
    pub pack_cache_capacity: usize,
    /// Session timezone offset applied when decoding TIMESTAMP values.
    pub session_tz_offset_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_buffers: false,
            enable_filters: true,
            pack_cache_capacity: 4096,
            session_tz_offset_secs: 0,
        }
    }
}

/// A writer transaction handle. Allocation and commit ordering live with
/// the transaction manager; the column engine only needs the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub id: TxId,
}

impl Transaction {
    pub fn new(id: TxId) -> Self {
        Self { id }
    }
}

/// A file scheduled for removal once in-flight readers are done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredRemove {
    pub path: PathBuf,
    pub table_id: u32,
}

/// Process-wide engine state.
pub struct Engine {
    pub cache: PackCache,
    pub filter_cache: FilterCache,
    config: EngineConfig,
    max_xid: Mutex<TxId>,
    next_xid: Mutex<u64>,
    deferred: Mutex<Vec<DeferredRemove>>,
    indexes: DashMap<PathBuf, Arc<dyn TableIndex>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            cache: PackCache::new(config.pack_cache_capacity),
            filter_cache: FilterCache::new(),
            config,
            max_xid: Mutex::new(TxId::default()),
            next_xid: Mutex::new(1),
            deferred: Mutex::new(Vec::new()),
            indexes: DashMap::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Highest committed transaction id.
    pub fn max_xid(&self) -> TxId {
        *self.max_xid.lock()
    }

    /// Raise the high-water mark (monotonic).
    pub fn advance_max_xid(&self, xid: TxId) {
        let mut guard = self.max_xid.lock();
        if xid > *guard {
            *guard = xid;
        }
    }

    /// Allocate a fresh writer transaction.
    pub fn begin_transaction(&self) -> Transaction {
        let mut next = self.next_xid.lock();
        let id = TxId::new(0, *next);
        *next += 1;
        debug!("begin transaction {id}");
        Transaction::new(id)
    }

    // --- deferred file removal ---

    /// Queue an obsolete file; it stays on disk until a purge, so
    /// in-flight readers at older versions can still open it.
    pub fn defer_remove(&self, path: PathBuf, table_id: u32) {
        debug!("defer removal of {} (table {table_id})", path.display());
        self.deferred.lock().push(DeferredRemove { path, table_id });
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().len()
    }

    pub fn deferred_paths(&self) -> Vec<PathBuf> {
        self.deferred.lock().iter().map(|d| d.path.clone()).collect()
    }

    /// Remove everything queued. The caller guarantees no reader can
    /// still need these versions.
    pub fn purge_deferred(&self) -> Result<usize> {
        let drained: Vec<DeferredRemove> = std::mem::take(&mut *self.deferred.lock());
        let n = drained.len();
        for d in drained {
            match std::fs::remove_file(&d.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if n > 0 {
            info!("purged {n} obsolete version files");
        }
        Ok(n)
    }

    // --- table index registry ---

    pub fn register_table_index(&self, table_path: PathBuf, index: Arc<dyn TableIndex>) {
        self.indexes.insert(table_path, index);
    }

    pub fn table_index(&self, table_path: &Path) -> Option<Arc<dyn TableIndex>> {
        self.indexes.get(table_path).map(|e| Arc::clone(e.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_max_xid_is_monotonic() {
        let engine = Engine::new(EngineConfig::default());
        engine.advance_max_xid(TxId::new(0, 5));
        engine.advance_max_xid(TxId::new(0, 3));
        assert_eq!(engine.max_xid(), TxId::new(0, 5));
    }

    #[test]
    fn test_begin_transaction_increments() {
        let engine = Engine::new(EngineConfig::default());
        let t1 = engine.begin_transaction();
        let t2 = engine.begin_transaction();
        assert!(t2.id > t1.id);
    }

    #[test]
    fn test_defer_and_purge() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obsolete");
        std::fs::write(&path, b"x").unwrap();

        let engine = Engine::new(EngineConfig::default());
        engine.defer_remove(path.clone(), 1);
        assert!(path.exists(), "file survives until purge");
        assert_eq!(engine.deferred_len(), 1);

        let n = engine.purge_deferred().unwrap();
        assert_eq!(n, 1);
        assert!(!path.exists());
        assert_eq!(engine.deferred_len(), 0);
    }

    #[test]
    fn test_purge_tolerates_missing_files() {
        let engine = Engine::new(EngineConfig::default());
        engine.defer_remove(PathBuf::from("/nonexistent/file"), 1);
        assert_eq!(engine.purge_deferred().unwrap(), 1);
    }
}
