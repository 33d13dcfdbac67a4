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

//! Rough-set filter maintenance across the commit pipeline.

use std::sync::Arc;
use tempfile::tempdir;

use strata_column::{
    Attribute, ColumnKind, ColumnShare, ColumnType, Engine, EngineConfig, FilterType, Transaction,
    TxId, Value, ValueCache,
};

fn int_batch(values: &[i64]) -> ValueCache {
    let mut vc = ValueCache::new();
    for v in values {
        vc.push(Value::Int(*v));
    }
    vc
}

fn str_batch(values: &[&[u8]]) -> ValueCache {
    let mut vc = ValueCache::new();
    for v in values {
        vc.push(Value::Bytes(v.to_vec()));
    }
    vc
}

fn commit_ints(dir: &std::path::Path, engine: &Arc<Engine>, values: &[i64]) -> (Arc<ColumnShare>, TxId) {
    let col = dir.join("col_1");
    ColumnShare::create(&col, &ColumnType::new(ColumnKind::BigInt), 16, 0).unwrap();
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    let v1 = TxId::new(0, 1);
    let mut attr = Attribute::open(
        engine.clone(),
        share.clone(),
        TxId::default(),
        Some(Transaction::new(v1)),
    )
    .unwrap();
    attr.load_data(&int_batch(values)).unwrap();
    assert!(attr.save_version().unwrap());
    attr.post_commit().unwrap();
    (share, v1)
}

#[test]
fn test_histogram_prunes_absent_values() {
    let dir = tempdir().unwrap();
    let engine = Engine::new(EngineConfig::default());
    let (share, v1) = commit_ints(dir.path(), &engine, &[0, 1_000_000]);

    let r = Attribute::open(engine.clone(), share, v1, None).unwrap();
    let filter = r.reader_filter(FilterType::Hist).unwrap().unwrap();
    let hist = filter.as_hist().unwrap();
    let d = r.dpn_data(0);

    assert!(hist.possible_value(0, &d, 0));
    assert!(hist.possible_value(0, &d, 1_000_000));
    assert!(!hist.possible_value(0, &d, 500_000), "empty middle bucket");
    assert!(!hist.possible_value(0, &d, -5), "outside the span");

    // the instance is shared through the filter cache
    let again = r.reader_filter(FilterType::Hist).unwrap().unwrap();
    assert!(Arc::ptr_eq(&filter, &again));
}

#[test]
fn test_string_filters_roundtrip_through_commit() {
    let dir = tempdir().unwrap();
    let col = dir.path().join("col_1");
    let ctype = ColumnType::new(ColumnKind::Varchar).with_precision(32);
    ColumnShare::create(&col, &ctype, 16, 0).unwrap();

    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    let v1 = TxId::new(0, 1);
    let mut attr = Attribute::open(
        engine.clone(),
        share.clone(),
        TxId::default(),
        Some(Transaction::new(v1)),
    )
    .unwrap();
    attr.load_data(&str_batch(&[b"alpha", b"beta", b"gamma"]))
        .unwrap();
    assert!(attr.save_version().unwrap());
    attr.post_commit().unwrap();

    let r = Attribute::open(engine.clone(), share.clone(), v1, None).unwrap();

    let bloom = r.reader_filter(FilterType::Bloom).unwrap().unwrap();
    let bloom = bloom.as_bloom().unwrap();
    assert!(bloom.possible(0, b"alpha"));
    assert!(bloom.possible(0, b"gamma"));

    let cmap = r.reader_filter(FilterType::Cmap).unwrap().unwrap();
    let cmap = cmap.as_cmap().unwrap();
    assert!(cmap.possible_prefix(0, b"be"));
    assert!(!cmap.possible_prefix(0, b"x"), "no value starts with x");

    // numeric histogram does not apply to string packs
    assert!(r.reader_filter(FilterType::Hist).unwrap().is_none());
}

#[test]
fn test_filters_follow_new_version() {
    let dir = tempdir().unwrap();
    let engine = Engine::new(EngineConfig::default());
    let (share, v1) = commit_ints(dir.path(), &engine, &[10, 20, 30]);

    // the v1 filter exists on disk
    let hist_v1 = share
        .filter_dir()
        .join("HIST")
        .join(v1.file_name());
    assert!(hist_v1.exists());

    // a second version rewrites the filter under its own id
    let v2 = TxId::new(0, 2);
    let mut w = Attribute::open(
        engine.clone(),
        share.clone(),
        v1,
        Some(Transaction::new(v2)),
    )
    .unwrap();
    w.update_data(0, Value::Int(99)).unwrap();
    assert!(w.save_version().unwrap());
    w.post_commit().unwrap();

    let hist_v2 = share
        .filter_dir()
        .join("HIST")
        .join(v2.file_name());
    assert!(hist_v2.exists());
    assert!(engine.deferred_paths().contains(&hist_v1));

    let r = Attribute::open(engine, share, v2, None).unwrap();
    let filter = r.reader_filter(FilterType::Hist).unwrap().unwrap();
    let hist = filter.as_hist().unwrap();
    let d = r.dpn_data(0);
    assert!(hist.possible_value(0, &d, 99));
}

#[test]
fn test_filters_can_be_disabled() {
    let dir = tempdir().unwrap();
    let engine = Engine::new(EngineConfig {
        enable_filters: false,
        ..Default::default()
    });
    let (share, v1) = commit_ints(dir.path(), &engine, &[1, 2, 3]);

    let hist_v1 = share.filter_dir().join("HIST").join(v1.file_name());
    assert!(!hist_v1.exists(), "nothing materialised");

    let r = Attribute::open(engine, share, v1, None).unwrap();
    assert!(r.reader_filter(FilterType::Hist).unwrap().is_none());
}
