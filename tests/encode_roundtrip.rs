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

//! Encoding round-trip properties.

use proptest::prelude::*;
use std::sync::Arc;
use tempfile::tempdir;

use strata_column::{
    Attribute, ColumnKind, ColumnShare, ColumnType, Engine, EngineConfig, Transaction, TxId,
    Value, MINUS_INF_64, PLUS_INF_64,
};

fn lookup_attr(dir: &std::path::Path) -> Attribute {
    let col = dir.join("col_1");
    let ctype = ColumnType::new(ColumnKind::String)
        .with_lookup(true)
        .with_precision(255);
    ColumnShare::create(&col, &ctype, 16, 0).unwrap();
    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    Attribute::open(
        engine,
        share,
        TxId::default(),
        Some(Transaction::new(TxId::new(0, 1))),
    )
    .unwrap()
}

fn decimal_attr(dir: &std::path::Path, scale: u8) -> Attribute {
    let col = dir.join("col_num");
    let ctype = ColumnType::new(ColumnKind::Num)
        .with_precision(18)
        .with_scale(scale);
    ColumnShare::create(&col, &ctype, 16, 0).unwrap();
    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();
    Attribute::open(engine, share, TxId::default(), None).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Lookup columns: encode then decode is the identity for any byte
    /// string within the column precision.
    #[test]
    fn prop_dictionary_roundtrip(values in prop::collection::vec(
        prop::collection::vec(any::<u8>(), 0..64),
        1..16,
    )) {
        let dir = tempdir().unwrap();
        let mut attr = lookup_attr(dir.path());

        let mut codes = Vec::new();
        for v in &values {
            codes.push(attr.encode_string(Some(v), true).unwrap());
        }
        for (v, code) in values.iter().zip(&codes) {
            let decoded = attr.decode_to_string(*code as i64).unwrap();
            prop_assert_eq!(decoded.as_deref(), Some(v.as_slice()));
        }
        // re-encoding an existing value never grows the dictionary
        let len = attr.dictionary().unwrap().len();
        for v in &values {
            attr.encode_string(Some(v), true).unwrap();
        }
        prop_assert_eq!(attr.dictionary().unwrap().len(), len);
    }

    /// Fixed-scale encoding rounds down and reports it.
    #[test]
    fn prop_encode_value64_scale(v in -1_000_000_000i64..1_000_000_000, vp in 0u8..6) {
        let dir = tempdir().unwrap();
        let scale = 3u8;
        let mut attr = decimal_attr(dir.path(), scale);

        let mut rounded = false;
        let encoded = attr
            .encode_value64(&Value::Decimal { v, scale: vp }, &mut rounded)
            .unwrap();

        // reference computation
        let expected = if vp <= scale {
            v * 10i64.pow((scale - vp) as u32)
        } else {
            v / 10i64.pow((vp - scale) as u32)
        };
        prop_assert_eq!(encoded, expected);

        // rounded is set exactly when the inverse differs from the input
        let inverse_at_vp = if vp <= scale {
            encoded / 10i64.pow((scale - vp) as u32)
        } else {
            encoded * 10i64.pow((vp - scale) as u32)
        };
        prop_assert_eq!(rounded, inverse_at_vp != v);
    }

    /// Overflowing rescales clamp to the infinity sentinels.
    #[test]
    fn prop_encode_value64_clamps(v in prop::sample::select(vec![i64::MAX / 4, i64::MIN / 4])) {
        let dir = tempdir().unwrap();
        let mut attr = decimal_attr(dir.path(), 3);

        let mut rounded = false;
        let encoded = attr
            .encode_value64(&Value::Decimal { v, scale: 0 }, &mut rounded)
            .unwrap();
        if v > 0 {
            prop_assert_eq!(encoded, PLUS_INF_64);
        } else {
            prop_assert_eq!(encoded, MINUS_INF_64);
        }
    }
}

#[test]
fn test_encode_null_is_null_sentinel() {
    let dir = tempdir().unwrap();
    let mut attr = decimal_attr(dir.path(), 2);
    let mut rounded = false;
    assert_eq!(
        attr.encode_value64(&Value::Null, &mut rounded).unwrap(),
        strata_column::NULL_VALUE_64
    );
}

#[test]
fn test_encode_real_into_decimal_column() {
    let dir = tempdir().unwrap();
    let mut attr = decimal_attr(dir.path(), 2);

    let mut rounded = false;
    let v = attr
        .encode_value64(&Value::Real(1.25), &mut rounded)
        .unwrap();
    assert_eq!(v, 125);
    assert!(!rounded);

    let v = attr
        .encode_value64(&Value::Real(1.239), &mut rounded)
        .unwrap();
    assert_eq!(v, 123);
    assert!(rounded, "sub-scale digits were dropped");
}

#[test]
fn test_absent_value_without_new_flag_is_null_code() {
    let dir = tempdir().unwrap();
    let mut attr = lookup_attr(dir.path());
    attr.encode_string(Some(b"present"), true).unwrap();
    let code = attr.encode_string(Some(b"absent"), false).unwrap();
    assert_eq!(code, i32::MIN);
    assert_eq!(attr.dictionary().unwrap().len(), 1);
}

/// A keep-alive for the dictionary clone discipline: encoding through a
/// second transaction must not mutate the published version.
#[test]
fn test_dictionary_versions_are_immutable_once_published() {
    let dir = tempdir().unwrap();
    let col = dir.path().join("col_1");
    let ctype = ColumnType::new(ColumnKind::String)
        .with_lookup(true)
        .with_precision(64);
    ColumnShare::create(&col, &ctype, 16, 0).unwrap();
    let engine = Engine::new(EngineConfig::default());
    let share = ColumnShare::open(&col, 1, 1).unwrap();

    let v1 = TxId::new(0, 1);
    let mut w1 = Attribute::open(
        engine.clone(),
        share.clone(),
        TxId::default(),
        Some(Transaction::new(v1)),
    )
    .unwrap();
    w1.encode_string(Some(b"alpha"), true).unwrap();
    let mut vc = strata_column::ValueCache::new();
    vc.push(Value::Int(0));
    w1.load_data(&vc).unwrap();
    assert!(w1.save_version().unwrap());
    w1.post_commit().unwrap();
    let published = Arc::clone(w1.dictionary().unwrap());
    let published_len = published.len();

    let v2 = TxId::new(0, 2);
    let mut w2 = Attribute::open(
        engine,
        share,
        v1,
        Some(Transaction::new(v2)),
    )
    .unwrap();
    w2.encode_string(Some(b"beta"), true).unwrap();

    assert_eq!(published.len(), published_len, "published version untouched");
    assert_eq!(w2.dictionary().unwrap().len(), published_len + 1);
}
