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

//! # strata-column
//!
//! The per-column versioned pack storage engine of StrataDB.
//!
//! A column lives in its own directory, divided into fixed-size row
//! groups ("packs"), each summarised by a descriptor carrying aggregate
//! statistics used to prune scans. Committed transactions observe
//! consistent snapshots; writers buffer changes in copy-on-write pack
//! copies and publish atomically.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Attribute (per-transaction view)                        │
//! │   header + ordered descriptor-slot vector + mutations   │
//! ├────────────────────────────┬────────────────────────────┤
//! │ ColumnShare (per column)   │ Engine (process-wide)      │
//! │   descriptor arena (DN)    │   pack cache (pinned)      │
//! │   payload heap (DATA)      │   filter cache             │
//! │   freelist, metadata       │   deferred file removal    │
//! ├────────────────────────────┴────────────────────────────┤
//! │ Packs · Dictionary versions · Rough-set filters         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Versioning
//!
//! Each committed version is one snapshot file (`V/<xid>`): the header
//! plus `np` descriptor-slot indices. Writers allocate fresh descriptor
//! slots, so a reader's slot vector keeps resolving to unchanged
//! descriptors and packs for as long as the reader lives. `save_version`
//! prepares (flushes packs, filters, dictionary, snapshot), and
//! `post_commit` publishes (clears `local`, stamps predecessor `xmax`,
//! schedules obsolete files for deferred removal).

pub mod attribute;
pub mod cache;
pub mod dictionary;
pub mod dpn;
pub mod engine;
pub mod error;
pub mod filter;
pub mod index;
pub mod loader;
pub mod meta;
pub mod pack;
pub mod selection;
pub mod share;
pub mod txid;
pub mod types;

pub use attribute::Attribute;
pub use cache::{DictCoordinate, PackCache, PackCoordinate};
pub use dictionary::Dictionary;
pub use dpn::{Dpn, DpnData};
pub use engine::{Engine, EngineConfig, Transaction};
pub use error::{Result, StrataError};
pub use filter::{BloomPackFilter, CmapFilter, FilterCache, FilterType, HistFilter};
pub use index::{IndexCode, TableIndex};
pub use loader::ValueCache;
pub use meta::{ColumnMeta, ColumnVersionHeader};
pub use pack::Pack;
pub use selection::SelectionFilter;
pub use share::ColumnShare;
pub use txid::{TxId, MAX_XID};
pub use types::{
    Collation, ColumnKind, ColumnType, PackOntologicalStatus, PackType, Value, MINUS_INF_64,
    NULL_VALUE_64, PLUS_INF_64,
};
