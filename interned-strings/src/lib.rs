// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Append-only string interning.
//!
//! Event names and descriptions repeat heavily across a trace, so records
//! store a [`StringId`] and the text lives once in a [`StringTable`]. Ids are
//! dense, assigned in first-seen order and never reused. Lookups take a shared
//! lock; interning takes the exclusive lock through a [`StringWriter`], which
//! serializes writers against each other.

use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub type StringId = u32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InternError {
    #[error("string table is full ({0} entries)")]
    Exhausted(usize),
    #[error("allocation failed while growing the string table")]
    AllocFailure,
}

#[derive(Default)]
struct Inner {
    strings: Vec<Arc<str>>,
    ids: HashMap<Arc<str>, StringId>,
    bytes: usize,
}

impl Inner {
    fn reserve(&mut self, value: &str) -> Result<StringId, InternError> {
        if let Some(&id) = self.ids.get(value) {
            return Ok(id);
        }
        let id = StringId::try_from(self.strings.len())
            .map_err(|_| InternError::Exhausted(self.strings.len()))?;
        self.strings
            .try_reserve(1)
            .map_err(|_| InternError::AllocFailure)?;
        self.ids
            .try_reserve(1)
            .map_err(|_| InternError::AllocFailure)?;

        let shared: Arc<str> = Arc::from(value);
        self.strings.push(shared.clone());
        self.ids.insert(shared, id);
        self.bytes += value.len();
        Ok(id)
    }
}

#[derive(Default)]
pub struct StringTable {
    inner: RwLock<Inner>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                strings: Vec::with_capacity(capacity),
                ids: HashMap::with_capacity(capacity),
                bytes: 0,
            }),
        }
    }

    /// Interns a single string. Prefer [`StringTable::writer`] when interning
    /// a batch.
    pub fn reserve(&self, value: &str) -> Result<StringId, InternError> {
        if let Some(&id) = self.inner.read().ids.get(value) {
            return Ok(id);
        }
        self.inner.write().reserve(value)
    }

    pub fn writer(&self) -> StringWriter<'_> {
        StringWriter {
            guard: self.inner.write(),
        }
    }

    pub fn get(&self, id: StringId) -> Option<Arc<str>> {
        self.inner.read().strings.get(id as usize).cloned()
    }

    pub fn lookup(&self, value: &str) -> Option<StringId> {
        self.inner.read().ids.get(value).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of string payload held by the table.
    pub fn payload_bytes(&self) -> usize {
        self.inner.read().bytes
    }

    /// Payload plus the per-entry bookkeeping of both the id vector and the
    /// reverse map.
    pub fn memory_footprint(&self) -> usize {
        let inner = self.inner.read();
        let per_entry = std::mem::size_of::<Arc<str>>() * 2 + std::mem::size_of::<StringId>();
        std::mem::size_of::<Self>() + inner.bytes + inner.strings.capacity() * per_entry
    }
}

impl std::fmt::Debug for StringTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("StringTable")
            .field("len", &inner.strings.len())
            .field("bytes", &inner.bytes)
            .finish()
    }
}

/// Exclusive access for interning a batch of strings.
pub struct StringWriter<'a> {
    guard: RwLockWriteGuard<'a, Inner>,
}

impl StringWriter<'_> {
    pub fn reserve(&mut self, value: &str) -> Result<StringId, InternError> {
        self.guard.reserve(value)
    }
}
