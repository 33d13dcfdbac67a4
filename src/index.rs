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

//! Table index collaborator
//!
//! Unique-key enforcement lives outside the column engine; updates of
//! key columns are routed through this trait. String keys pass raw
//! bytes, numeric keys their little-endian 8-byte form.

use crate::txid::TxId;

/// Outcome of an index maintenance call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexCode {
    Ok,
    DupKey,
    Failed,
}

/// Primary-key index of one table.
pub trait TableIndex: Send + Sync {
    /// Column ordinals that participate in the key.
    fn key_cols(&self) -> Vec<u32>;

    /// Replace `old_key` with `new_key` for `row`.
    fn update_index(&self, tx: TxId, new_key: &[u8], old_key: &[u8], row: u64) -> IndexCode;
}
