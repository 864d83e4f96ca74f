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

//! Typed result containers filled by the fetch controller.

use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    UInt64 = 0,
    Double = 1,
    String = 2,
    Object = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    NumEntries,
    EntryIndexed,

    EventId,
    EventTrack,
    EventStart,
    EventEnd,
    EventName,
    EventCategory,
    EventNumChildren,

    SampleId,
    SampleType,
    SampleTimestamp,
    SampleValue,
    SampleNumChildren,

    PointTrack,
    PointTimestamp,
    PointValue,
    PointDuration,
    PointNumChildren,
    PointMin,
    PointMax,

    RowTrack,
    RowNumCells,
    RowCell,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    UInt64(u64),
    Double(f64),
    String(Arc<str>),
}

impl Value {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            Value::UInt64(_) => PrimitiveType::UInt64,
            Value::Double(_) => PrimitiveType::Double,
            Value::String(_) => PrimitiveType::String,
        }
    }

    /// Total order within one primitive type. Values of different types
    /// order by type.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::UInt64(a), Value::UInt64(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (a, b) => (a.primitive_type() as u8).cmp(&(b.primitive_type() as u8)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventEntry {
    pub id: u64,
    pub track: u32,
    pub start: u64,
    pub end: u64,
    pub name: Arc<str>,
    pub category: Arc<str>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleEntry {
    pub track: u32,
    pub timestamp: u64,
    pub value: f64,
}

/// One downsampled bin. For sample series `value` is the bin mean; for event
/// series `timestamp` is the earliest start and `duration` the longest event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphPoint {
    pub track: u32,
    pub timestamp: u64,
    pub value: f64,
    pub duration: u64,
    pub children: u64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub track: u32,
    pub cells: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Event(EventEntry),
    Sample(SampleEntry),
    Point(GraphPoint),
    Row(TableRow),
}

impl Entry {
    pub fn get(&self, property: Property, index: u64) -> Result<Value> {
        let value = match (self, property) {
            (Entry::Event(e), Property::EventId) => Value::UInt64(e.id),
            (Entry::Event(e), Property::EventTrack) => Value::UInt64(e.track as u64),
            (Entry::Event(e), Property::EventStart) => Value::UInt64(e.start),
            (Entry::Event(e), Property::EventEnd) => Value::UInt64(e.end),
            (Entry::Event(e), Property::EventName) => Value::String(e.name.clone()),
            (Entry::Event(e), Property::EventCategory) => Value::String(e.category.clone()),
            (Entry::Event(_), Property::EventNumChildren) => Value::UInt64(0),

            (Entry::Sample(s), Property::SampleId) => Value::UInt64(s.track as u64),
            (Entry::Sample(_), Property::SampleType) => {
                Value::UInt64(PrimitiveType::Double as u64)
            }
            (Entry::Sample(s), Property::SampleTimestamp) => Value::UInt64(s.timestamp),
            (Entry::Sample(s), Property::SampleValue) => Value::Double(s.value),
            (Entry::Sample(_), Property::SampleNumChildren) => Value::UInt64(0),

            (Entry::Point(p), Property::PointTrack) => Value::UInt64(p.track as u64),
            (Entry::Point(p), Property::PointTimestamp) => Value::UInt64(p.timestamp),
            (Entry::Point(p), Property::PointValue) => Value::Double(p.value),
            (Entry::Point(p), Property::PointDuration) => Value::UInt64(p.duration),
            (Entry::Point(p), Property::PointNumChildren) => Value::UInt64(p.children),
            (Entry::Point(p), Property::PointMin) => Value::Double(p.min),
            (Entry::Point(p), Property::PointMax) => Value::Double(p.max),

            (Entry::Row(r), Property::RowTrack) => Value::UInt64(r.track as u64),
            (Entry::Row(r), Property::RowNumCells) => Value::UInt64(r.cells.len() as u64),
            (Entry::Row(r), Property::RowCell) => {
                let len = r.cells.len();
                let index = usize::try_from(index).unwrap_or(usize::MAX);
                r.cells
                    .get(index)
                    .cloned()
                    .ok_or(Error::IndexOutOfRange { index, len })?
            }

            (_, property) => {
                return Err(Error::invalid(format!(
                    "{:?} is not a property of this entry",
                    property
                )))
            }
        };
        Ok(value)
    }

    pub fn get_u64(&self, property: Property, index: u64) -> Result<u64> {
        match self.get(property, index)? {
            Value::UInt64(v) => Ok(v),
            _ => Err(Error::InvalidType),
        }
    }

    pub fn get_f64(&self, property: Property, index: u64) -> Result<f64> {
        match self.get(property, index)? {
            Value::Double(v) => Ok(v),
            _ => Err(Error::InvalidType),
        }
    }

    pub fn get_string(&self, property: Property, index: u64) -> Result<Arc<str>> {
        match self.get(property, index)? {
            Value::String(v) => Ok(v),
            _ => Err(Error::InvalidType),
        }
    }
}

#[derive(Default)]
struct ArrayInner {
    entries: RwLock<Vec<Entry>>,
    writing: AtomicBool,
}

/// Output of a fetch. Cloning shares the same storage. At most one fetch
/// writes into an array at a time.
#[derive(Clone, Default)]
pub struct Array {
    inner: Arc<ArrayInner>,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut entries = Vec::new();
        entries
            .try_reserve(capacity)
            .map_err(|_| Error::AllocFailure)?;
        Ok(Self {
            inner: Arc::new(ArrayInner {
                entries: RwLock::new(entries),
                writing: AtomicBool::new(false),
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a fetch is still writing into this array.
    pub fn is_busy(&self) -> bool {
        self.inner.writing.load(atomic::Ordering::Acquire)
    }

    pub fn get(&self, index: usize) -> Option<Entry> {
        self.inner.entries.read().get(index).cloned()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.inner.entries.read().clone()
    }

    pub fn get_u64(&self, property: Property, _index: u64) -> Result<u64> {
        match property {
            Property::NumEntries => Ok(self.len() as u64),
            Property::EntryIndexed => Err(Error::InvalidType),
            other => Err(Error::invalid(format!("{:?} is not an array property", other))),
        }
    }

    pub fn get_object(&self, property: Property, index: u64) -> Result<Entry> {
        match property {
            Property::EntryIndexed => {
                let entries = self.inner.entries.read();
                let index = usize::try_from(index).unwrap_or(usize::MAX);
                entries.get(index).cloned().ok_or(Error::IndexOutOfRange {
                    index,
                    len: entries.len(),
                })
            }
            Property::NumEntries => Err(Error::InvalidType),
            other => Err(Error::invalid(format!("{:?} is not an array property", other))),
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.begin_write()?.clear();
        Ok(())
    }

    pub(crate) fn begin_write(&self) -> Result<ArrayWriter> {
        self.inner
            .writing
            .compare_exchange(
                false,
                true,
                atomic::Ordering::AcqRel,
                atomic::Ordering::Acquire,
            )
            .map_err(|_| Error::invalid("array is being written by another fetch"))?;
        Ok(ArrayWriter {
            inner: self.inner.clone(),
        })
    }
}

/// Exclusive write access to an [`Array`], released on drop.
pub(crate) struct ArrayWriter {
    inner: Arc<ArrayInner>,
}

impl ArrayWriter {
    pub(crate) fn clear(&mut self) {
        self.inner.entries.write().clear();
    }

    /// Appends `entries`, stopping at the first failed allocation. Entries
    /// pushed before the failure stay in the array.
    pub(crate) fn extend<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = Entry>,
    {
        let mut out = self.inner.entries.write();
        let entries = entries.into_iter();
        if out.try_reserve(entries.size_hint().0).is_err() {
            return Err(Error::AllocFailure);
        }
        for entry in entries {
            out.try_reserve(1).map_err(|_| Error::AllocFailure)?;
            out.push(entry);
        }
        Ok(())
    }
}

impl Drop for ArrayWriter {
    fn drop(&mut self) {
        self.inner.writing.store(false, atomic::Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn event() -> Entry {
        Entry::Event(EventEntry {
            id: 9,
            track: 1,
            start: 100,
            end: 150,
            name: Arc::from("gemm"),
            category: Arc::from("KERNEL_DISPATCH"),
        })
    }

    #[rstest]
    #[case(Property::EventId, 9)]
    #[case(Property::EventStart, 100)]
    #[case(Property::EventEnd, 150)]
    #[case(Property::EventNumChildren, 0)]
    fn test_event_u64(#[case] property: Property, #[case] expected: u64) {
        assert_eq!(event().get_u64(property, 0).unwrap(), expected);
    }

    #[test]
    fn test_typed_access_errors() {
        let entry = event();
        assert_eq!(&*entry.get_string(Property::EventName, 0).unwrap(), "gemm");
        assert_eq!(entry.get_f64(Property::EventId, 0), Err(Error::InvalidType));
        assert!(matches!(
            entry.get_u64(Property::SampleValue, 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_row_cells() {
        let row = Entry::Row(TableRow {
            track: 0,
            cells: vec![Value::UInt64(1), Value::Double(2.5)],
        });
        assert_eq!(row.get_f64(Property::RowCell, 1).unwrap(), 2.5);
        assert_eq!(row.get_u64(Property::RowNumCells, 0).unwrap(), 2);
        assert_eq!(
            row.get(Property::RowCell, 2),
            Err(Error::IndexOutOfRange { index: 2, len: 2 })
        );
    }

    #[test]
    fn test_single_writer() {
        let array = Array::new();
        let mut writer = array.begin_write().unwrap();
        assert!(array.is_busy());
        assert!(array.begin_write().is_err());
        writer.extend([event(), event()]).unwrap();
        drop(writer);

        assert!(!array.is_busy());
        assert_eq!(array.get_u64(Property::NumEntries, 0).unwrap(), 2);
        assert_eq!(array.get_object(Property::EntryIndexed, 1).unwrap(), event());
        assert!(matches!(
            array.get_object(Property::EntryIndexed, 2),
            Err(Error::IndexOutOfRange { .. })
        ));
        array.clear().unwrap();
        assert!(array.is_empty());
    }
}
