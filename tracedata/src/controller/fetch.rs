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

use std::sync::Arc;

use interned_strings::StringId;

use crate::array::{Entry, EventEntry, SampleEntry};
use crate::trace::{RangeRecords, Trace};
use crate::{Error, Result};

pub(crate) fn check_range(start: u64, end: u64) -> Result<()> {
    if start > end {
        return Err(Error::invalid(format!("start {} after end {}", start, end)));
    }
    Ok(())
}

/// Turns raw track records into array entries.
pub(crate) fn project(trace: &Trace, track: u32, records: RangeRecords) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    out.try_reserve(records.len())
        .map_err(|_| Error::AllocFailure)?;
    match records {
        RangeRecords::Metrics(samples) => {
            out.extend(samples.into_iter().map(|s| {
                Entry::Sample(SampleEntry {
                    track,
                    timestamp: s.timestamp,
                    value: s.value,
                })
            }));
        }
        RangeRecords::Events(events) => {
            for e in events {
                out.push(Entry::Event(EventEntry {
                    id: e.id,
                    track,
                    start: e.start,
                    end: e.end(),
                    name: resolve(trace, e.description_id)?,
                    category: resolve(trace, e.type_id)?,
                }));
            }
        }
    }
    Ok(out)
}

pub(crate) fn resolve(trace: &Trace, id: StringId) -> Result<Arc<str>> {
    trace
        .strings()
        .get(id)
        .ok_or_else(|| Error::invalid(format!("unknown string id {}", id)))
}
