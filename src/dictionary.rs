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

//! Lookup dictionaries
//!
//! A lookup column stores dictionary codes in its numeric packs; the
//! dictionary maps codes back to byte strings. Published dictionary
//! versions are immutable: the first mutation inside a transaction clones
//! the dictionary, the clone is published to the cache under
//! `dict_ver + 1`, and only the clone ever takes appends. Older versions
//! stay addressable for readers at older snapshots.

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, StrataError};

const DICT_MAGIC: u32 = 0x3143_4453; // "SDC1"
const CHECKSUM_SIZE: usize = 32;

#[derive(Debug, Default)]
struct DictInner {
    entries: Vec<Vec<u8>>,
    index: HashMap<Vec<u8>, i32>,
    changed: bool,
}

/// String <-> code map for one dictionary version.
#[derive(Debug)]
pub struct Dictionary {
    inner: RwLock<DictInner>,
    /// Maximum value size accepted (the column precision).
    precision: u32,
}

impl Dictionary {
    pub fn new(precision: u32) -> Self {
        Self {
            inner: RwLock::new(DictInner::default()),
            precision,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// True once this instance took an append; a changed dictionary is a
    /// transaction-private clone.
    pub fn changed(&self) -> bool {
        self.inner.read().changed
    }

    /// Code of `value`, if present.
    pub fn code(&self, value: &[u8]) -> Option<i32> {
        self.inner.read().index.get(value).copied()
    }

    /// Append a new value, returning its code. The value must not be
    /// present already.
    pub fn add(&self, value: &[u8]) -> i32 {
        let mut inner = self.inner.write();
        debug_assert!(!inner.index.contains_key(value));
        let code = inner.entries.len() as i32;
        inner.entries.push(value.to_vec());
        inner.index.insert(value.to_vec(), code);
        inner.changed = true;
        code
    }

    pub fn value(&self, code: i32) -> Option<Vec<u8>> {
        self.inner.read().entries.get(code as usize).cloned()
    }

    pub fn value_size(&self, code: i32) -> Option<usize> {
        self.inner.read().entries.get(code as usize).map(Vec::len)
    }

    /// Private copy for copy-on-write; the clone starts unchanged.
    pub fn clone_dict(&self) -> Dictionary {
        let inner = self.inner.read();
        Dictionary {
            inner: RwLock::new(DictInner {
                entries: inner.entries.clone(),
                index: inner.index.clone(),
                changed: false,
            }),
            precision: self.precision,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let inner = self.inner.read();
        let mut buf = Vec::new();
        buf.extend_from_slice(&DICT_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.precision.to_le_bytes());
        buf.extend_from_slice(&(inner.entries.len() as u32).to_le_bytes());
        for e in &inner.entries {
            buf.extend_from_slice(&(e.len() as u32).to_le_bytes());
            buf.extend_from_slice(e);
        }
        let checksum = blake3::hash(&buf);
        buf.extend_from_slice(checksum.as_bytes());

        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        f.write_all(&buf)?;
        f.sync_all()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Dictionary> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 12 + CHECKSUM_SIZE {
            return Err(StrataError::DataFormat {
                path: path.display().to_string(),
                details: "dictionary file too small".into(),
            });
        }
        let (data, stored) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
        if blake3::hash(data).as_bytes() != stored {
            return Err(StrataError::Corruption(format!(
                "dictionary checksum mismatch in {}",
                path.display()
            )));
        }
        let magic = LittleEndian::read_u32(&data[0..4]);
        if magic != DICT_MAGIC {
            return Err(StrataError::DataFormat {
                path: path.display().to_string(),
                details: format!("bad dictionary magic {magic:#x}"),
            });
        }
        let precision = LittleEndian::read_u32(&data[4..8]);
        let count = LittleEndian::read_u32(&data[8..12]) as usize;

        let mut inner = DictInner::default();
        let mut pos = 12;
        for code in 0..count {
            if pos + 4 > data.len() {
                return Err(StrataError::Corruption("dictionary truncated".into()));
            }
            let len = LittleEndian::read_u32(&data[pos..pos + 4]) as usize;
            pos += 4;
            if pos + len > data.len() {
                return Err(StrataError::Corruption("dictionary truncated".into()));
            }
            let value = data[pos..pos + len].to_vec();
            pos += len;
            inner.index.insert(value.clone(), code as i32);
            inner.entries.push(value);
        }

        Ok(Dictionary {
            inner: RwLock::new(inner),
            precision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_add_and_lookup() {
        let dict = Dictionary::new(64);
        assert_eq!(dict.code(b"alpha"), None);
        let a = dict.add(b"alpha");
        let b = dict.add(b"beta");
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(dict.code(b"alpha"), Some(0));
        assert_eq!(dict.value(1).as_deref(), Some(&b"beta"[..]));
        assert_eq!(dict.value_size(0), Some(5));
        assert!(dict.changed());
    }

    #[test]
    fn test_clone_is_private() {
        let dict = Dictionary::new(64);
        dict.add(b"alpha");

        let clone = dict.clone_dict();
        assert!(!clone.changed());
        assert_eq!(clone.code(b"alpha"), Some(0));

        clone.add(b"beta");
        assert_eq!(clone.len(), 2);
        assert_eq!(dict.len(), 1, "original untouched by clone mutation");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1");

        let dict = Dictionary::new(32);
        dict.add(b"one");
        dict.add(b"two");
        dict.add(b"");
        dict.save(&path).unwrap();

        let loaded = Dictionary::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.precision(), 32);
        assert_eq!(loaded.code(b"two"), Some(1));
        assert_eq!(loaded.code(b""), Some(2));
        assert!(!loaded.changed());
    }

    #[test]
    fn test_load_detects_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1");
        let dict = Dictionary::new(32);
        dict.add(b"one");
        dict.save(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(Dictionary::load(&path).is_err());
    }
}
