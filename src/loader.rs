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

//! Load-time value batches
//!
//! A `ValueCache` holds one parsed batch on its way into a pack: 1-level
//! codes for numeric columns (dictionary codes for lookup columns, double
//! bit patterns for real columns) and raw bytes for string columns.
//! Statistics are computed once per batch; nulls can be coalesced into a
//! column default for NOT NULL columns.

use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntStats {
    pub min: i64,
    pub max: i64,
    pub sum: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealStats {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

/// One batch of incoming values.
#[derive(Debug, Default)]
pub struct ValueCache {
    values: Vec<Value>,
    nulls: usize,
    sum_size: u64,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, v: Value) {
        self.sum_size += match &v {
            Value::Null => 0,
            Value::Bytes(b) => b.len() as u64,
            _ => 8,
        };
        if v.is_null() {
            self.nulls += 1;
        }
        self.values.push(v);
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn num_nulls(&self) -> usize {
        self.nulls
    }

    /// Total raw byte size of the batch.
    pub fn summarized_size(&self) -> u64 {
        self.sum_size
    }

    /// 1-level code at `i`, with nulls coalesced into `default`.
    pub fn int_at(&self, i: usize, default: Option<i64>) -> Option<i64> {
        match &self.values[i] {
            Value::Null => default,
            Value::Int(v) => Some(*v),
            Value::DateTime(v) => Some(*v),
            Value::Decimal { v, .. } => Some(*v),
            Value::Real(d) => Some(d.to_bits() as i64),
            Value::Bytes(_) => None,
        }
    }

    pub fn real_at(&self, i: usize, default: Option<f64>) -> Option<f64> {
        match &self.values[i] {
            Value::Null => default,
            Value::Real(d) => Some(*d),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn str_at(&self, i: usize) -> Option<&[u8]> {
        match &self.values[i] {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Integer statistics over the batch; nulls become `default` when
    /// given, otherwise they are skipped. Empty result when nothing
    /// contributes.
    pub fn calc_int_stats(&self, default: Option<i64>) -> Option<IntStats> {
        let mut stats: Option<IntStats> = None;
        for i in 0..self.values.len() {
            let Some(v) = self.int_at(i, default) else {
                continue;
            };
            match &mut stats {
                None => {
                    stats = Some(IntStats {
                        min: v,
                        max: v,
                        sum: v,
                    })
                }
                Some(s) => {
                    s.min = s.min.min(v);
                    s.max = s.max.max(v);
                    s.sum = s.sum.wrapping_add(v);
                }
            }
        }
        stats
    }

    pub fn calc_real_stats(&self, default: Option<f64>) -> Option<RealStats> {
        let mut stats: Option<RealStats> = None;
        for i in 0..self.values.len() {
            let Some(v) = self.real_at(i, default) else {
                continue;
            };
            match &mut stats {
                None => {
                    stats = Some(RealStats {
                        min: v,
                        max: v,
                        sum: v,
                    })
                }
                Some(s) => {
                    s.min = s.min.min(v);
                    s.max = s.max.max(v);
                    s.sum += v;
                }
            }
        }
        stats
    }
}
