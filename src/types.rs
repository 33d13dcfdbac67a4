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

//! Column type metadata and the one-level value model
//!
//! Every stored value is reduced to a 64-bit "1-level" code: integers and
//! decimals directly, doubles as their bit pattern, strings through the
//! lookup dictionary, temporal values as packed seconds. The sentinels
//! below carve reserved points out of the i64 domain.

use std::cmp::Ordering;

/// 1-level NULL marker.
pub const NULL_VALUE_64: i64 = 0x8000_0000_0000_0001_u64 as i64;
/// Smallest representable 1-level value.
pub const MINUS_INF_64: i64 = 0x8000_0000_0000_0002_u64 as i64;
/// Largest representable 1-level value.
pub const PLUS_INF_64: i64 = i64::MAX;
/// 32-bit NULL marker (dictionary codes).
pub const NULL_VALUE_32: i32 = i32::MIN;
/// Used by the conservative sum-overflow test.
pub const SHORT_MAX: i64 = 32767;

/// Descriptor slot index sentinel.
pub const INVALID_PACK_INDEX: u32 = u32::MAX;
/// Pack payload address sentinel: the pack is trivial, no payload exists.
pub const INVALID_ADDR: u64 = u64::MAX;

/// Physical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnKind {
    TinyInt = 0,
    SmallInt = 1,
    MediumInt = 2,
    Int = 3,
    BigInt = 4,
    Float = 5,
    Real = 6,
    Num = 7,
    String = 8,
    Varchar = 9,
    Bytes = 10,
    VarBytes = 11,
    Date = 12,
    Time = 13,
    Year = 14,
    DateTime = 15,
    Timestamp = 16,
}

impl ColumnKind {
    pub fn from_code(code: u8) -> Option<Self> {
        use ColumnKind::*;
        Some(match code {
            0 => TinyInt,
            1 => SmallInt,
            2 => MediumInt,
            3 => Int,
            4 => BigInt,
            5 => Float,
            6 => Real,
            7 => Num,
            8 => String,
            9 => Varchar,
            10 => Bytes,
            11 => VarBytes,
            12 => Date,
            13 => Time,
            14 => Year,
            15 => DateTime,
            16 => Timestamp,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnKind::TinyInt
                | ColumnKind::SmallInt
                | ColumnKind::MediumInt
                | ColumnKind::Int
                | ColumnKind::BigInt
        )
    }

    pub fn is_real(self) -> bool {
        matches!(self, ColumnKind::Float | ColumnKind::Real)
    }

    /// Text types (subject to dictionary encoding when the column is a
    /// lookup column).
    pub fn is_text(self) -> bool {
        matches!(self, ColumnKind::String | ColumnKind::Varchar)
    }

    pub fn is_binary(self) -> bool {
        matches!(self, ColumnKind::Bytes | ColumnKind::VarBytes)
    }

    pub fn is_string_like(self) -> bool {
        self.is_text() || self.is_binary()
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            ColumnKind::Date
                | ColumnKind::Time
                | ColumnKind::Year
                | ColumnKind::DateTime
                | ColumnKind::Timestamp
        )
    }

    /// Width of the textual rendering of a fixed-width value; 0 for
    /// variable-width kinds.
    pub fn display_size(self) -> usize {
        match self {
            ColumnKind::TinyInt => 4,
            ColumnKind::SmallInt => 6,
            ColumnKind::MediumInt => 9,
            ColumnKind::Int => 11,
            ColumnKind::BigInt => 20,
            ColumnKind::Float => 12,
            ColumnKind::Real => 22,
            ColumnKind::Num => 21,
            ColumnKind::Year => 4,
            ColumnKind::Date => 10,
            ColumnKind::Time => 8,
            ColumnKind::DateTime | ColumnKind::Timestamp => 19,
            _ => 0,
        }
    }
}

/// Collation used for string comparison. `CaseInsensitive` stands in for
/// the collations that require a transformation before byte comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Collation {
    #[default]
    Binary = 0,
    CaseInsensitive = 1,
}

impl Collation {
    pub fn from_code(code: u8) -> Self {
        if code == 1 {
            Collation::CaseInsensitive
        } else {
            Collation::Binary
        }
    }

    /// True when byte comparison alone is not enough.
    pub fn requires_transform(self) -> bool {
        self == Collation::CaseInsensitive
    }
}

/// Collation-aware comparison of raw values. Pure, no state.
pub fn collation_cmp(collation: Collation, a: &[u8], b: &[u8]) -> Ordering {
    match collation {
        Collation::Binary => a.cmp(b),
        Collation::CaseInsensitive => {
            let la = a.iter().map(|c| c.to_ascii_lowercase());
            let lb = b.iter().map(|c| c.to_ascii_lowercase());
            la.cmp(lb)
        }
    }
}

/// Physical pack layout: numeric packs store 64-bit codes, string packs
/// store raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackType {
    Int,
    Str,
}

/// Full column type descriptor (immutable, from the META file).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnType {
    pub kind: ColumnKind,
    pub not_null: bool,
    pub lookup: bool,
    pub precision: u32,
    pub scale: u8,
    pub collation: Collation,
}

impl ColumnType {
    pub fn new(kind: ColumnKind) -> Self {
        Self {
            kind,
            not_null: false,
            lookup: false,
            precision: 0,
            scale: 0,
            collation: Collation::Binary,
        }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_not_null(mut self, not_null: bool) -> Self {
        self.not_null = not_null;
        self
    }

    pub fn with_lookup(mut self, lookup: bool) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }

    /// Lookup columns are stored as numeric packs of dictionary codes.
    pub fn pack_type(&self) -> PackType {
        if self.kind.is_string_like() && !self.lookup {
            PackType::Str
        } else {
            PackType::Int
        }
    }

    pub fn display_size(&self) -> usize {
        let fixed = self.kind.display_size();
        if fixed != 0 {
            fixed
        } else {
            self.precision as usize
        }
    }
}

/// A 0-level value as seen by loaders and updaters.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    /// Integral value, scale 0.
    Int(i64),
    /// Fixed-point value carrying its own scale.
    Decimal { v: i64, scale: u8 },
    Real(f64),
    Bytes(Vec<u8>),
    /// Packed temporal value (UTC seconds for TIMESTAMP).
    DateTime(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Rough classification of one pack, derivable from its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackOntologicalStatus {
    NullsOnly,
    Uniform,
    UniformAndNulls,
    Normal,
}

/// 10^n for n <= 18 without floating point.
pub fn pow10_u64(n: u32) -> u64 {
    const TABLE: [u64; 19] = [
        1,
        10,
        100,
        1_000,
        10_000,
        100_000,
        1_000_000,
        10_000_000,
        100_000_000,
        1_000_000_000,
        10_000_000_000,
        100_000_000_000,
        1_000_000_000_000,
        10_000_000_000_000,
        100_000_000_000_000,
        1_000_000_000_000_000,
        10_000_000_000_000_000,
        100_000_000_000_000_000,
        1_000_000_000_000_000_000,
    ];
    TABLE[(n as usize).min(18)]
}

/// Render a fixed-point 1-level code with the given scale.
pub fn format_decimal(v: i64, scale: u8) -> String {
    if scale == 0 {
        return v.to_string();
    }
    let div = pow10_u64(scale as u32) as i64;
    let sign = if v < 0 { "-" } else { "" };
    let a = v.unsigned_abs();
    let int_part = a / div as u64;
    let frac = a % div as u64;
    format!("{sign}{int_part}.{frac:0width$}", width = scale as usize)
}

/// Civil-calendar conversion of seconds-since-epoch, used when rendering
/// temporal values. Days algorithm after Hinnant.
pub fn format_datetime(secs: i64) -> String {
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    let (h, m, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let mo = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if mo <= 2 { y + 1 } else { y };

    format!("{y:04}-{mo:02}-{d:02} {h:02}:{m:02}:{s:02}")
}
