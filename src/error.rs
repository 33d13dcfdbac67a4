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

//! Error types for the column engine

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrataError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Bad pack type: {0}")]
    BadPackType(String),

    #[error("Bad filter type: {0}")]
    BadFilterType(String),

    #[error("Data format error in {path}: {details}")]
    DataFormat { path: String, details: String },

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Duplicate entry: {0} for primary key")]
    DuplicateKey(String),

    #[error("Mutation attempted without a writer transaction")]
    ReadOnlyTransaction,

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StrataError>;
