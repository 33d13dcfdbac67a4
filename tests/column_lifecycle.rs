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

//! Column creation and bulk-load behaviour.

use std::sync::Arc;
use tempfile::tempdir;

use strata_column::{
    Attribute, ColumnKind, ColumnShare, ColumnType, Engine, EngineConfig, PackOntologicalStatus,
    Transaction, TxId, Value, ValueCache, NULL_VALUE_64,
};

fn open_writer(
    engine: &Arc<Engine>,
    share: &Arc<ColumnShare>,
    at: TxId,
    tx: TxId,
) -> Attribute {
    Attribute::open(
        engine.clone(),
        share.clone(),
        at,
        Some(Transaction::new(tx)),
    )
    .unwrap()
}

fn int_batch(values: &[Option<i64>]) -> ValueCache {
    let mut vc = ValueCache::new();
    for v in values {
        vc.push(match v {
            Some(x) => Value::Int(*x),
            None => Value::Null,
        });
    }
    vc
}

#[test]
fn test_create_empty_column_with_preexisting_rows() {
    let dir = tempdir().unwrap();
    let col = dir.path().join("col_1");
    let ctype = ColumnType::new(ColumnKind::Int);
    ColumnShare::create(&col, &ctype, 16, 100_000).unwrap();

    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    let attr = Attribute::open(engine, share, TxId::default(), None).unwrap();

    assert_eq!(attr.num_packs(), 2, "ceil(100000 / 65536)");
    assert_eq!(attr.header().nr, 100_000);
    assert_eq!(attr.header().nn, 100_000);

    let first = attr.dpn_data(0);
    assert_eq!(first.nr, 65_536);
    assert_eq!(first.nn, 65_536);
    assert!(first.null_only());

    let last = attr.dpn_data(1);
    assert_eq!(last.nr, 100_000 - 65_536);
    assert_eq!(last.nn, 100_000 - 65_536);

    for pi in 0..2 {
        assert_eq!(
            attr.pack_ontological_status(pi),
            PackOntologicalStatus::NullsOnly
        );
        assert!(attr.is_null((pi as u64) << 16).unwrap());
    }
    assert_eq!(attr.value_int64(0).unwrap(), NULL_VALUE_64);
}

#[test]
fn test_append_integers_with_null() {
    let dir = tempdir().unwrap();
    let col = dir.path().join("col_1");
    ColumnShare::create(&col, &ColumnType::new(ColumnKind::BigInt), 16, 0).unwrap();

    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    let tx = TxId::new(0, 1);
    let mut attr = open_writer(&engine, &share, TxId::default(), tx);

    attr.load_data(&int_batch(&[Some(1), Some(2), Some(3), None, Some(5)]))
        .unwrap();

    assert_eq!(attr.num_packs(), 1);
    let d = attr.dpn_data(0);
    assert_eq!(d.nr, 5);
    assert_eq!(d.nn, 1);
    assert_eq!(d.min, 1);
    assert_eq!(d.max, 5);
    assert_eq!(d.sum, 11);
    assert!(!d.null_only());
    assert_eq!(attr.header().min, 1);
    assert_eq!(attr.header().max, 5);
    assert_eq!(attr.header().nr, 5);
    assert_eq!(attr.header().nn, 1);

    // row reads through the freshly loaded pack
    assert_eq!(attr.value_int64(0).unwrap(), 1);
    assert_eq!(attr.value_int64(3).unwrap(), NULL_VALUE_64);
    assert_eq!(attr.value_int64(4).unwrap(), 5);
    assert_eq!(attr.get_value(2, false).unwrap(), Value::Int(3));

    assert!(attr.save_version().unwrap());
    attr.post_commit().unwrap();

    // reopen at the committed version
    let attr = Attribute::open(engine, share, tx, None).unwrap();
    assert_eq!(attr.value_int64(1).unwrap(), 2);
    assert_eq!(attr.header().nn, 1);
}

#[test]
fn test_uniform_load_then_widening_load() {
    let dir = tempdir().unwrap();
    let col = dir.path().join("col_1");
    ColumnShare::create(&col, &ColumnType::new(ColumnKind::BigInt), 16, 0).unwrap();

    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    let mut attr = open_writer(&engine, &share, TxId::default(), TxId::new(0, 1));

    // batch A: uniform, stays trivial
    attr.load_data(&int_batch(&[Some(7), Some(7), Some(7)])).unwrap();
    let d = attr.dpn_data(0);
    assert_eq!((d.min, d.max, d.nr), (7, 7, 3));
    assert_eq!(
        attr.pack_ontological_status(0),
        PackOntologicalStatus::Uniform
    );
    assert!(d.trivial(strata_column::PackType::Int));
    assert_eq!(d.sum, 21);

    // batch B widens the range: a pack is materialised
    attr.load_data(&int_batch(&[Some(7), Some(9)])).unwrap();
    let d = attr.dpn_data(0);
    assert_eq!(d.nr, 5);
    assert_eq!(d.max, 9);
    assert_eq!(d.sum, 37);
    assert_eq!(
        attr.pack_ontological_status(0),
        PackOntologicalStatus::Normal
    );

    // all five rows readable, including the expanded uniform prefix
    for (row, want) in [(0, 7), (1, 7), (2, 7), (3, 7), (4, 9)] {
        assert_eq!(attr.value_int64(row).unwrap(), want);
    }

    assert!(attr.save_version().unwrap());
    attr.post_commit().unwrap();
}

#[test]
fn test_all_null_batches_stay_trivial() {
    let dir = tempdir().unwrap();
    let col = dir.path().join("col_1");
    ColumnShare::create(&col, &ColumnType::new(ColumnKind::Int), 16, 0).unwrap();

    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    let mut attr = open_writer(&engine, &share, TxId::default(), TxId::new(0, 1));

    attr.load_data(&int_batch(&[None, None, None])).unwrap();
    attr.load_data(&int_batch(&[None])).unwrap();

    let d = attr.dpn_data(0);
    assert_eq!(d.nr, 4);
    assert_eq!(d.nn, 4);
    assert!(d.null_only());
    assert_eq!(attr.header().nr, 4);
    assert_eq!(attr.header().nn, 4);
    assert_eq!(
        attr.pack_ontological_status(0),
        PackOntologicalStatus::NullsOnly
    );
    assert_eq!(attr.get_value(0, false).unwrap(), Value::Null);
}

#[test]
fn test_load_spills_into_second_pack() {
    let dir = tempdir().unwrap();
    let col = dir.path().join("col_1");
    // tiny packs: 4 rows each
    ColumnShare::create(&col, &ColumnType::new(ColumnKind::BigInt), 2, 0).unwrap();

    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    let mut attr = open_writer(&engine, &share, TxId::default(), TxId::new(0, 1));

    attr.load_data(&int_batch(&[Some(1), Some(2), Some(3), Some(4)]))
        .unwrap();
    assert_eq!(attr.num_packs(), 1);

    attr.load_data(&int_batch(&[Some(5)])).unwrap();
    assert_eq!(attr.num_packs(), 2, "full pack forces a fresh descriptor");
    assert_eq!(attr.value_int64(4).unwrap(), 5);
    assert_eq!(attr.dpn_data(1).nr, 1);
    assert_eq!(attr.header().nr, 5);
}

#[test]
fn test_string_column_load_and_read() {
    let dir = tempdir().unwrap();
    let col = dir.path().join("col_1");
    let ctype = ColumnType::new(ColumnKind::Varchar).with_precision(32);
    ColumnShare::create(&col, &ctype, 16, 0).unwrap();

    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    let tx = TxId::new(0, 1);
    let mut attr = open_writer(&engine, &share, TxId::default(), tx);

    let mut vc = ValueCache::new();
    for v in [Some(&b"beta"[..]), None, Some(&b"alpha"[..])] {
        vc.push(match v {
            Some(b) => Value::Bytes(b.to_vec()),
            None => Value::Null,
        });
    }
    attr.load_data(&vc).unwrap();

    let d = attr.dpn_data(0);
    assert_eq!(d.nr, 3);
    assert_eq!(d.nn, 1);
    assert_eq!(d.sum, 9, "total byte size");
    assert_eq!(attr.get_min_string(0).unwrap(), b"alpha".to_vec());
    assert_eq!(attr.get_max_string(0).unwrap(), b"beta".to_vec());

    assert_eq!(
        attr.get_value(0, false).unwrap(),
        Value::Bytes(b"beta".to_vec())
    );
    assert_eq!(attr.get_value(1, false).unwrap(), Value::Null);
    assert_eq!(attr.get_length(2).unwrap(), 5);

    assert!(attr.save_version().unwrap());
    attr.post_commit().unwrap();

    let attr = Attribute::open(engine, share, tx, None).unwrap();
    assert_eq!(
        attr.get_value_bin(2).unwrap(),
        Some(b"alpha".to_vec())
    );
}

#[test]
fn test_header_natural_and_compressed_sizes() {
    let dir = tempdir().unwrap();
    let col = dir.path().join("col_1");
    ColumnShare::create(&col, &ColumnType::new(ColumnKind::BigInt), 16, 0).unwrap();

    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    let tx = TxId::new(0, 1);
    let mut attr = open_writer(&engine, &share, TxId::default(), tx);

    attr.load_data(&int_batch(&[Some(10), Some(20), Some(30)]))
        .unwrap();
    assert!(attr.save_version().unwrap());

    // compressed size equals the sum of non-trivial descriptor lengths
    let total: u64 = (0..attr.num_packs())
        .map(|pi| {
            let d = attr.dpn_data(pi);
            if d.addr == strata_column::types::INVALID_ADDR {
                0
            } else {
                d.len as u64
            }
        })
        .sum();
    assert_eq!(attr.header().compressed_size, total);
    assert!(total > 0);
    assert_eq!(attr.header().natural_size, 24);
    assert_eq!(attr.compute_natural_size(), 24);
}
