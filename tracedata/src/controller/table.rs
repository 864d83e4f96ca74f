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

use protocol::TrackKind;

use crate::arguments::{ArgumentKey, Arguments};
use crate::array::{Entry, PrimitiveType, TableRow, Value};
use crate::trace::{RangeRecords, Trace};
use crate::{Error, Result};

use super::fetch::resolve;
use super::TrackHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Events = 0,
    Samples = 1,
}

impl TryFrom<u64> for TableKind {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            0 => Ok(TableKind::Events),
            1 => Ok(TableKind::Samples),
            other => Err(Error::invalid(format!("unknown table type {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: &'static str,
    pub kind: PrimitiveType,
}

const fn column(name: &'static str, kind: PrimitiveType) -> Column {
    Column { name, kind }
}

const EVENT_COLUMNS: &[Column] = &[
    column("Id", PrimitiveType::UInt64),
    column("Start", PrimitiveType::UInt64),
    column("End", PrimitiveType::UInt64),
    column("Name", PrimitiveType::String),
    column("Category", PrimitiveType::String),
    column("Children", PrimitiveType::UInt64),
];

const SAMPLE_COLUMNS: &[Column] = &[
    column("Id", PrimitiveType::UInt64),
    column("Type", PrimitiveType::UInt64),
    column("Timestamp", PrimitiveType::UInt64),
    column("Value", PrimitiveType::Double),
    column("Children", PrimitiveType::UInt64),
];

impl TableKind {
    pub fn columns(self) -> &'static [Column] {
        match self {
            TableKind::Events => EVENT_COLUMNS,
            TableKind::Samples => SAMPLE_COLUMNS,
        }
    }

    /// Column rows are ordered by when no sort column is given.
    pub fn time_column(self) -> usize {
        match self {
            TableKind::Events => 1,
            TableKind::Samples => 2,
        }
    }

    pub fn accepts(self, kind: TrackKind) -> bool {
        match self {
            TableKind::Events => kind != TrackKind::Metric,
            TableKind::Samples => kind == TrackKind::Metric,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Ascending = 0,
    Descending = 1,
}

impl TryFrom<u64> for SortOrder {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            0 => Ok(SortOrder::Ascending),
            1 => Ok(SortOrder::Descending),
            other => Err(Error::invalid(format!("unknown sort order {}", other))),
        }
    }
}

/// A table fetch with its arguments checked and copied out.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TableQuery {
    pub kind: TableKind,
    pub tracks: Vec<TrackHandle>,
    pub start: u64,
    pub end: u64,
    pub sort_column: usize,
    pub order: SortOrder,
    pub start_index: usize,
    pub count: Option<usize>,
}

impl TableQuery {
    pub(crate) fn parse(table: TableKind, args: &Arguments) -> Result<Self> {
        let u64_or = |key, default| -> Result<u64> {
            Ok(args.get_u64(key, 0)?.unwrap_or(default))
        };

        let kind = TableKind::try_from(u64_or(ArgumentKey::TableType, table as u64)?)?;
        if kind != table {
            return Err(Error::invalid(format!(
                "{:?} arguments given to a {:?} table",
                kind, table
            )));
        }

        let num_tracks = args
            .get_u64(ArgumentKey::NumTracks, 0)?
            .ok_or_else(|| Error::invalid("NumTracks is required"))?;
        if num_tracks == 0 {
            return Err(Error::invalid("a table needs at least one track"));
        }
        let mut tracks = Vec::new();
        for i in 0..num_tracks {
            let index = u32::try_from(i).map_err(|_| Error::invalid("too many tracks"))?;
            let track = args
                .track(index)
                .ok_or_else(|| Error::invalid(format!("track {} missing", i)))?;
            if tracks.contains(&track) {
                return Err(Error::invalid(format!("track {} listed twice", i)));
            }
            tracks.push(track);
        }

        let start = u64_or(ArgumentKey::StartTime, 0)?;
        let end = u64_or(ArgumentKey::EndTime, u64::MAX)?;
        if start > end {
            return Err(Error::invalid(format!("start {} after end {}", start, end)));
        }

        let sort_column = u64_or(ArgumentKey::SortColumn, table.time_column() as u64)? as usize;
        if sort_column >= table.columns().len() {
            return Err(Error::invalid(format!("no column {}", sort_column)));
        }
        let order = SortOrder::try_from(u64_or(ArgumentKey::SortOrder, 0)?)?;
        let start_index = usize::try_from(u64_or(ArgumentKey::StartIndex, 0)?).unwrap_or(usize::MAX);
        let count = args
            .get_u64(ArgumentKey::StartCount, 0)?
            .map(|c| usize::try_from(c).unwrap_or(usize::MAX));

        Ok(Self {
            kind,
            tracks,
            start,
            end,
            sort_column,
            order,
            start_index,
            count,
        })
    }
}

/// Merges `tracks` into one sorted, paged list of rows.
pub(crate) fn build_rows(trace: &Trace, tracks: &[u32], query: &TableQuery) -> Result<Vec<Entry>> {
    let mut rows: Vec<(u32, usize, TableRow)> = Vec::new();
    for &track in tracks {
        let records = trace.records_in_range(track, query.start, query.end)?;
        rows.try_reserve(records.len())
            .map_err(|_| Error::AllocFailure)?;
        match records {
            RangeRecords::Metrics(samples) => {
                for (i, s) in samples.iter().enumerate() {
                    let cells = vec![
                        Value::UInt64(track as u64),
                        Value::UInt64(PrimitiveType::Double as u64),
                        Value::UInt64(s.timestamp),
                        Value::Double(s.value),
                        Value::UInt64(0),
                    ];
                    rows.push((track, i, TableRow { track, cells }));
                }
            }
            RangeRecords::Events(events) => {
                for (i, e) in events.iter().enumerate() {
                    let name = resolve(trace, e.description_id)?;
                    let category = resolve(trace, e.type_id)?;
                    let cells = vec![
                        Value::UInt64(e.id),
                        Value::UInt64(e.start),
                        Value::UInt64(e.end()),
                        Value::String(name),
                        Value::String(category),
                        Value::UInt64(0),
                    ];
                    rows.push((track, i, TableRow { track, cells }));
                }
            }
        }
    }

    let column = query.sort_column;
    rows.sort_by(|a, b| {
        let by_column = a.2.cells[column].total_cmp(&b.2.cells[column]);
        let by_column = match query.order {
            SortOrder::Ascending => by_column,
            SortOrder::Descending => by_column.reverse(),
        };
        by_column.then(a.0.cmp(&b.0)).then(a.1.cmp(&b.1))
    });

    Ok(rows
        .into_iter()
        .skip(query.start_index)
        .take(query.count.unwrap_or(usize::MAX))
        .map(|(_, _, row)| Entry::Row(row))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Arena;
    use std::sync::Arc;

    fn tracks(count: u32) -> Vec<TrackHandle> {
        let mut traces = Arena::new();
        let trace = traces.insert(Arc::new(Trace::new(10)));
        (0..count).map(|index| TrackHandle { trace, index }).collect()
    }

    #[test]
    fn test_columns() {
        assert_eq!(TableKind::Events.columns().len(), 6);
        assert_eq!(TableKind::Samples.columns()[3].kind, PrimitiveType::Double);
        assert_eq!(TableKind::Samples.columns()[TableKind::Samples.time_column()].name, "Timestamp");
        assert!(TableKind::Events.accepts(TrackKind::KernelLaunch));
        assert!(!TableKind::Samples.accepts(TrackKind::KernelExecute));
    }

    #[test]
    fn test_parse_rejects_mismatched_type() {
        let args = Arguments::table(TableKind::Samples, &[], 0, 10);
        assert!(matches!(
            TableQuery::parse(TableKind::Events, &args),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_parse_defaults() {
        let args = Arguments::table(TableKind::Events, &tracks(2), 0, 10);
        let query = TableQuery::parse(TableKind::Events, &args).unwrap();
        assert_eq!(query.tracks.len(), 2);
        assert_eq!(query.sort_column, 1);
        assert_eq!(query.order, SortOrder::Ascending);
        assert_eq!(query.count, None);

        let bad = Arguments::table(TableKind::Events, &tracks(1), 0, 10)
            .sorted_by(6, SortOrder::Ascending);
        assert!(TableQuery::parse(TableKind::Events, &bad).is_err());
    }

    #[test]
    fn test_parse_rejects_empty_track_list() {
        let args = Arguments::table(TableKind::Samples, &[], 0, 10);
        assert!(matches!(
            TableQuery::parse(TableKind::Samples, &args),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_parse_rejects_duplicate_track() {
        let handles = tracks(1);
        let args = Arguments::table(TableKind::Samples, &[handles[0], handles[0]], 0, 10);
        assert!(matches!(
            TableQuery::parse(TableKind::Samples, &args),
            Err(Error::InvalidArgument(_))
        ));
    }
}
