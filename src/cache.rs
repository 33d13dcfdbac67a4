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

//! Process-wide pack and dictionary cache
//!
//! The cache is the sole owner of pack objects. Descriptors pin a pack by
//! holding its slab slot in their pack pointer word; the slot index is
//! what the tagged word carries instead of a raw address. Eviction only
//! reclaims packs whose pin count is zero.
//!
//! Dictionaries are deduplicated by `(table, column, dict_ver)`; a
//! published dictionary version never changes, so no pinning is needed
//! beyond the `Arc`.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dictionary::Dictionary;
use crate::error::Result;
use crate::pack::Pack;

/// Identifies a cached pack. The third component is the descriptor slot,
/// which is unique across versions of the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackCoordinate {
    pub table: u32,
    pub column: u32,
    pub slot: u32,
}

/// Identifies a cached dictionary version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DictCoordinate {
    pub table: u32,
    pub column: u32,
    pub ver: u32,
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

/// Fixed-slot arena of cached packs; slot indices are stable for the
/// lifetime of the entry.
#[derive(Debug, Default)]
struct PackSlab {
    entries: Vec<Option<Arc<Pack>>>,
    free: Vec<u32>,
}

impl PackSlab {
    fn insert(&mut self, pack: Arc<Pack>) -> u32 {
        if let Some(slot) = self.free.pop() {
            self.entries[slot as usize] = Some(pack);
            slot
        } else {
            self.entries.push(Some(pack));
            (self.entries.len() - 1) as u32
        }
    }

    fn get(&self, slot: u32) -> Option<Arc<Pack>> {
        self.entries.get(slot as usize)?.clone()
    }

    fn remove(&mut self, slot: u32) -> Option<Arc<Pack>> {
        let entry = self.entries.get_mut(slot as usize)?;
        let pack = entry.take();
        if pack.is_some() {
            self.free.push(slot);
        }
        pack
    }

    fn occupied(&self) -> usize {
        self.entries.len() - self.free.len()
    }
}

/// Process-wide cache of packs and dictionaries.
pub struct PackCache {
    map: DashMap<PackCoordinate, u32>,
    slab: RwLock<PackSlab>,
    capacity: usize,
    dicts: DashMap<DictCoordinate, Arc<Dictionary>>,
    stats: CacheStats,
}

impl PackCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: DashMap::new(),
            slab: RwLock::new(PackSlab::default()),
            capacity: capacity.max(1),
            dicts: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Cached pack for a coordinate, or the result of `loader` published
    /// under it. The returned pack is pinned; the caller owes one
    /// `Pack::unlock`.
    pub fn get_or_fetch_pack(
        &self,
        coord: PackCoordinate,
        loader: impl FnOnce() -> Result<Pack>,
    ) -> Result<(u32, Arc<Pack>)> {
        if let Some(slot) = self.map.get(&coord).map(|e| *e) {
            let pack = self
                .slab
                .read()
                .get(slot)
                .expect("slab entry behind live coordinate");
            pack.lock();
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((slot, pack));
        }

        // Load outside any map lock. Concurrent loads of the same
        // descriptor are already serialised by its pack pointer word.
        let pack = Arc::new(loader()?);
        pack.lock();
        self.make_room();
        let slot = self.slab.write().insert(pack.clone());
        if let Some(old) = self.map.insert(coord, slot) {
            self.slab.write().remove(old);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Ok((slot, pack))
    }

    /// Cached pack if resident, pinned. No fetch.
    pub fn get_locked_pack(&self, coord: PackCoordinate) -> Option<Arc<Pack>> {
        let slot = *self.map.get(&coord)?;
        let pack = self.slab.read().get(slot)?;
        pack.lock();
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(pack)
    }

    /// Publish a pack built by the caller (copy-on-write clones). Pinned
    /// on return.
    pub fn put_pack(&self, coord: PackCoordinate, pack: Pack) -> (u32, Arc<Pack>) {
        let pack = Arc::new(pack);
        pack.lock();
        self.make_room();
        let slot = self.slab.write().insert(pack.clone());
        if let Some(old) = self.map.insert(coord, slot) {
            self.slab.write().remove(old);
        }
        (slot, pack)
    }

    /// Drop a coordinate outright, pinned or not. Used when the owning
    /// descriptor is being discarded.
    pub fn drop_pack(&self, coord: PackCoordinate) {
        if let Some((_, slot)) = self.map.remove(&coord) {
            self.slab.write().remove(slot);
        }
    }

    pub fn pack_by_slot(&self, slot: u32) -> Option<Arc<Pack>> {
        self.slab.read().get(slot)
    }

    pub fn len(&self) -> usize {
        self.slab.read().occupied()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn make_room(&self) {
        loop {
            {
                let slab = self.slab.read();
                if slab.occupied() < self.capacity {
                    return;
                }
            }
            // evict the first unpinned pack; give up when everything is
            // pinned (the cache may temporarily exceed capacity)
            let victim = {
                let slab = self.slab.read();
                slab.entries
                    .iter()
                    .flatten()
                    .find(|p| !p.is_locked())
                    .map(|p| p.coord())
            };
            match victim {
                Some(coord) => {
                    self.drop_pack(coord);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => return,
            }
        }
    }

    // --- dictionaries ---

    pub fn get_or_fetch_dict(
        &self,
        coord: DictCoordinate,
        loader: impl FnOnce() -> Result<Dictionary>,
    ) -> Result<Arc<Dictionary>> {
        match self.dicts.entry(coord) {
            dashmap::mapref::entry::Entry::Occupied(e) => Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let dict = Arc::new(loader()?);
                e.insert(dict.clone());
                Ok(dict)
            }
        }
    }

    pub fn put_dict(&self, coord: DictCoordinate, dict: Arc<Dictionary>) {
        self.dicts.insert(coord, dict);
    }

    pub fn drop_dict(&self, coord: DictCoordinate) {
        self.dicts.remove(&coord);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PackType;

    fn coord(slot: u32) -> PackCoordinate {
        PackCoordinate {
            table: 1,
            column: 1,
            slot,
        }
    }

    #[test]
    fn test_fetch_once_then_hit() {
        let cache = PackCache::new(16);
        let mut loads = 0;

        let (slot, _) = cache
            .get_or_fetch_pack(coord(0), || {
                loads += 1;
                Ok(Pack::new(coord(0), PackType::Int))
            })
            .unwrap();

        let (slot2, pack) = cache
            .get_or_fetch_pack(coord(0), || {
                loads += 1;
                Ok(Pack::new(coord(0), PackType::Int))
            })
            .unwrap();

        assert_eq!(loads, 1);
        assert_eq!(slot, slot2);
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        pack.unlock();
        pack.unlock();
    }

    #[test]
    fn test_eviction_skips_pinned() {
        let cache = PackCache::new(2);
        let (_, p0) = cache
            .get_or_fetch_pack(coord(0), || Ok(Pack::new(coord(0), PackType::Int)))
            .unwrap();
        let (_, p1) = cache
            .get_or_fetch_pack(coord(1), || Ok(Pack::new(coord(1), PackType::Int)))
            .unwrap();

        // p0 stays pinned, p1 is released
        p1.unlock();

        let (_, p2) = cache
            .get_or_fetch_pack(coord(2), || Ok(Pack::new(coord(2), PackType::Int)))
            .unwrap();

        assert!(cache.get_locked_pack(coord(0)).is_some());
        assert!(cache.get_locked_pack(coord(1)).is_none(), "evicted");
        p0.unlock();
        p2.unlock();
    }

    #[test]
    fn test_drop_pack_removes_entry() {
        let cache = PackCache::new(4);
        let (slot, pack) = cache
            .get_or_fetch_pack(coord(0), || Ok(Pack::new(coord(0), PackType::Int)))
            .unwrap();
        cache.drop_pack(coord(0));
        assert!(cache.pack_by_slot(slot).is_none());
        assert!(cache.get_locked_pack(coord(0)).is_none());
        drop(pack);
    }

    #[test]
    fn test_dict_dedup() {
        let cache = PackCache::new(4);
        let c = DictCoordinate {
            table: 1,
            column: 2,
            ver: 1,
        };
        let d1 = cache
            .get_or_fetch_dict(c, || Ok(Dictionary::new(8)))
            .unwrap();
        let d2 = cache
            .get_or_fetch_dict(c, || panic!("must not reload"))
            .unwrap();
        assert!(Arc::ptr_eq(&d1, &d2));
    }
}
