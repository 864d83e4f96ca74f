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

use std::collections::HashMap;

use crate::controller::{SortOrder, TableKind, TrackHandle};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentKey {
    TableType,
    NumTracks,
    TracksIndexed,
    StartTime,
    EndTime,
    SortColumn,
    SortOrder,
    StartIndex,
    StartCount,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArgumentValue {
    UInt64(u64),
    Track(TrackHandle),
}

/// Key/value bag describing a table fetch. Only `TracksIndexed` uses the
/// index; every other key lives at index 0. The controller copies what it
/// needs when the fetch is issued, so the bag can be reused right away.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: HashMap<(ArgumentKey, u32), ArgumentValue>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments for a fetch of `tracks` over `[start, end]`, with the track
    /// count filled in.
    pub fn table(kind: TableKind, tracks: &[TrackHandle], start: u64, end: u64) -> Self {
        let mut args = Self::new();
        args.put(ArgumentKey::TableType, kind as u64);
        args.put(ArgumentKey::NumTracks, tracks.len() as u64);
        args.put(ArgumentKey::StartTime, start);
        args.put(ArgumentKey::EndTime, end);
        for (i, &track) in tracks.iter().enumerate() {
            args.values.insert(
                (ArgumentKey::TracksIndexed, i as u32),
                ArgumentValue::Track(track),
            );
        }
        args
    }

    pub fn sorted_by(mut self, column: u64, order: SortOrder) -> Self {
        self.put(ArgumentKey::SortColumn, column);
        self.put(ArgumentKey::SortOrder, order as u64);
        self
    }

    pub fn page(mut self, start_index: u64, count: u64) -> Self {
        self.put(ArgumentKey::StartIndex, start_index);
        self.put(ArgumentKey::StartCount, count);
        self
    }

    fn put(&mut self, key: ArgumentKey, value: u64) {
        self.values.insert((key, 0), ArgumentValue::UInt64(value));
    }

    pub fn set_u64(&mut self, key: ArgumentKey, index: u32, value: u64) -> Result<()> {
        if key == ArgumentKey::TracksIndexed {
            return Err(Error::InvalidType);
        }
        if index != 0 {
            return Err(Error::invalid(format!("{:?} is not indexed", key)));
        }
        self.put(key, value);
        Ok(())
    }

    pub fn set_track(&mut self, index: u32, track: TrackHandle) {
        self.values.insert(
            (ArgumentKey::TracksIndexed, index),
            ArgumentValue::Track(track),
        );
    }

    pub fn get_u64(&self, key: ArgumentKey, index: u32) -> Result<Option<u64>> {
        match self.values.get(&(key, index)) {
            None => Ok(None),
            Some(ArgumentValue::UInt64(v)) => Ok(Some(*v)),
            Some(ArgumentValue::Track(_)) => Err(Error::InvalidType),
        }
    }

    pub fn track(&self, index: u32) -> Option<TrackHandle> {
        match self.values.get(&(ArgumentKey::TracksIndexed, index)) {
            Some(ArgumentValue::Track(track)) => Some(*track),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut args = Arguments::new();
        args.set_u64(ArgumentKey::StartTime, 0, 10).unwrap();
        assert_eq!(args.get_u64(ArgumentKey::StartTime, 0).unwrap(), Some(10));
        assert_eq!(args.get_u64(ArgumentKey::EndTime, 0).unwrap(), None);
        assert!(args.set_u64(ArgumentKey::StartTime, 1, 10).is_err());
        assert_eq!(
            args.set_u64(ArgumentKey::TracksIndexed, 0, 1),
            Err(Error::InvalidType)
        );
        args.clear();
        assert_eq!(args.get_u64(ArgumentKey::StartTime, 0).unwrap(), None);
    }

    #[test]
    fn test_builder() {
        let args = Arguments::table(TableKind::Samples, &[], 5, 50)
            .sorted_by(2, SortOrder::Descending)
            .page(10, 20);
        assert_eq!(args.get_u64(ArgumentKey::TableType, 0).unwrap(), Some(1));
        assert_eq!(args.get_u64(ArgumentKey::NumTracks, 0).unwrap(), Some(0));
        assert_eq!(args.get_u64(ArgumentKey::SortOrder, 0).unwrap(), Some(1));
        assert_eq!(args.get_u64(ArgumentKey::StartCount, 0).unwrap(), Some(20));
        assert!(args.track(0).is_none());
    }
}
