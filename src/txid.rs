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

//! Transaction identifiers
//!
//! A `TxId` is a totally ordered pair of 64-bit words. Version snapshot
//! files are named after the committing transaction's id, so the textual
//! form must be stable and filesystem safe.

use std::fmt;

/// Totally ordered transaction identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId {
    pub v1: u64,
    pub v2: u64,
}

/// Sentinel: a version that is never reached by any real transaction.
pub const MAX_XID: TxId = TxId {
    v1: u64::MAX,
    v2: u64::MAX,
};

impl TxId {
    pub const fn new(v1: u64, v2: u64) -> Self {
        Self { v1, v2 }
    }

    /// Filesystem-safe rendering used for version, dictionary and filter
    /// snapshot filenames.
    pub fn file_name(&self) -> String {
        format!("{:016x}-{:016x}", self.v1, self.v2)
    }

    /// Inverse of [`TxId::file_name`].
    pub fn parse(s: &str) -> Option<Self> {
        let (a, b) = s.split_once('-')?;
        let v1 = u64::from_str_radix(a, 16).ok()?;
        let v2 = u64::from_str_radix(b, 16).ok()?;
        Some(Self { v1, v2 })
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.v1, self.v2)
    }
}
