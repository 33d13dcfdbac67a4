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

//! The pack-lock protocol under concurrency.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::tempdir;

use strata_column::{
    Attribute, ColumnKind, ColumnShare, ColumnType, Engine, EngineConfig, Transaction, TxId,
    Value, ValueCache,
};

/// A committed column with one non-trivial pack, on a cold cache.
fn cold_column(dir: &std::path::Path) -> (Arc<Engine>, Arc<ColumnShare>, TxId) {
    let col = dir.join("col_1");
    ColumnShare::create(&col, &ColumnType::new(ColumnKind::BigInt), 4, 0).unwrap();

    let v1 = TxId::new(0, 1);
    {
        let engine = Engine::new(EngineConfig::default());
        let share = ColumnShare::open(&col, 1, 1).unwrap();
        let mut attr = Attribute::open(
            engine.clone(),
            share.clone(),
            TxId::default(),
            Some(Transaction::new(v1)),
        )
        .unwrap();
        let mut vc = ValueCache::new();
        for v in [3i64, 1, 4, 1, 5, 9, 2, 6] {
            vc.push(Value::Int(v));
        }
        attr.load_data(&vc).unwrap();
        assert!(attr.save_version().unwrap());
        attr.post_commit().unwrap();
    }

    // fresh engine and share: nothing cached, packs only on disk
    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    (engine, share, v1)
}

#[test]
fn test_contending_threads_fetch_once() {
    let dir = tempdir().unwrap();
    let (engine, share, v1) = cold_column(dir.path());
    let attr = Arc::new(Attribute::open(engine.clone(), share.clone(), v1, None).unwrap());
    let slot_index = attr.pack_index()[0];

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let attr = attr.clone();
            let share = share.clone();
            std::thread::spawn(move || {
                attr.lock_pack_for_use(0).unwrap();
                // while locked, the word carries at least one user
                assert!(share.dpn(slot_index).use_count() >= 1);
                let v = attr.value_int64(2).unwrap();
                attr.unlock_pack_from_use(0).unwrap();
                v
            })
        })
        .collect();

    for t in threads {
        assert_eq!(t.join().unwrap(), 4);
    }

    // exactly one fetch hit the disk
    assert_eq!(engine.cache.stats().misses.load(Ordering::Relaxed), 1);

    // after the last unlock the word is clear and the pack unpinned
    assert_eq!(share.dpn(slot_index).pack_ptr_raw(), 0);
    let coord = strata_column::PackCoordinate {
        table: 1,
        column: 1,
        slot: slot_index,
    };
    if let Some(pack) = engine.cache.get_locked_pack(coord) {
        pack.unlock();
        assert!(!pack.is_locked(), "no residual pins");
    }
}

#[test]
fn test_lock_unlock_restores_word() {
    let dir = tempdir().unwrap();
    let (engine, share, v1) = cold_column(dir.path());
    let attr = Attribute::open(engine, share.clone(), v1, None).unwrap();

    let slot = attr.pack_index()[0];
    attr.lock_pack_for_use(0).unwrap();
    let locked_word = share.dpn(slot).pack_ptr_raw();
    assert_ne!(locked_word, 0);

    attr.lock_pack_for_use(0).unwrap();
    attr.unlock_pack_from_use(0).unwrap();
    assert_eq!(share.dpn(slot).pack_ptr_raw(), locked_word);

    attr.unlock_pack_from_use(0).unwrap();
    assert_eq!(share.dpn(slot).pack_ptr_raw(), 0);
}

#[test]
fn test_unlock_without_lock_is_invariant_violation() {
    let dir = tempdir().unwrap();
    let (engine, share, v1) = cold_column(dir.path());
    let attr = Attribute::open(engine, share, v1, None).unwrap();
    assert!(attr.unlock_pack_from_use(0).is_err());
}

#[test]
fn test_trivial_packs_need_no_lock() {
    let dir = tempdir().unwrap();
    let col = dir.path().join("col_1");
    ColumnShare::create(&col, &ColumnType::new(ColumnKind::Int), 4, 8).unwrap();

    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    let attr = Attribute::open(engine.clone(), share.clone(), TxId::default(), None).unwrap();

    // null-only packs never touch the cache
    attr.lock_pack_for_use(0).unwrap();
    attr.unlock_pack_from_use(0).unwrap();
    assert_eq!(share.dpn(attr.pack_index()[0]).pack_ptr_raw(), 0);
    assert!(engine.cache.is_empty());
}

#[test]
fn test_many_readers_hammering_one_pack() {
    let dir = tempdir().unwrap();
    let (engine, share, v1) = cold_column(dir.path());
    let attr = Arc::new(Attribute::open(engine.clone(), share.clone(), v1, None).unwrap());

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let attr = attr.clone();
            std::thread::spawn(move || {
                for i in 0..50u64 {
                    let row = (t + i) % 8;
                    attr.lock_pack_for_use(0).unwrap();
                    let _ = attr.value_int64(row).unwrap();
                    attr.unlock_pack_from_use(0).unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    // balanced on every path
    assert_eq!(share.dpn(attr.pack_index()[0]).pack_ptr_raw(), 0);
}
