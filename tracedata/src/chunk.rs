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

//! Immutable, time-ordered record storage for one window of one track.

use std::collections::HashSet;
use std::mem::size_of;
use std::sync::Arc;

use interned_strings::{StringId, StringTable};
use protocol::{ChunkData, ChunkRecords, MetricRecord, RawEvent, RawFlow, TrackKind};

use crate::{Error, Result};

/// Half-open time window `[start, end)`. A chunk is tagged by `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Window {
    pub fn contains(&self, ts: u64) -> bool {
        self.start <= ts && ts < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelEventRecord {
    pub id: u64,
    pub start: u64,
    pub duration: u64,
    pub type_id: StringId,
    pub description_id: StringId,
}

impl KernelEventRecord {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.duration)
    }
}

#[derive(Debug)]
pub enum Records {
    Metrics(Vec<MetricRecord>),
    Events(Vec<KernelEventRecord>),
}

impl Records {
    fn len(&self) -> usize {
        match self {
            Records::Metrics(r) => r.len(),
            Records::Events(r) => r.len(),
        }
    }

    fn timestamp(&self, index: usize) -> u64 {
        match self {
            Records::Metrics(r) => r[index].timestamp,
            Records::Events(r) => r[index].start,
        }
    }

    fn footprint(&self) -> usize {
        match self {
            Records::Metrics(r) => r.capacity() * size_of::<MetricRecord>(),
            Records::Events(r) => r.capacity() * size_of::<KernelEventRecord>(),
        }
    }
}

#[derive(Debug)]
pub struct Chunk {
    track: u32,
    window: Window,
    records: Records,
    flows: Vec<RawFlow>,
    strings: Arc<StringTable>,
}

impl Chunk {
    /// Copies database output into engine storage. Records outside the
    /// window are dropped, the rest are stably sorted by timestamp and every
    /// string is interned into `strings`.
    pub fn from_data(
        data: ChunkData,
        kind: TrackKind,
        window: Window,
        strings: &Arc<StringTable>,
    ) -> Result<Chunk> {
        let mut builder = ChunkBuilder::new(data.track, window, kind, strings.clone());
        match data.records {
            ChunkRecords::Metrics(mut samples) => {
                samples.retain(|s| window.contains(s.timestamp));
                samples.sort_by_key(|s| s.timestamp);
                builder.reserve(samples.len())?;
                for sample in samples {
                    builder.push_metric(sample)?;
                }
            }
            ChunkRecords::Events { mut events, flows } => {
                events.retain(|e| window.contains(e.start));
                events.sort_by_key(|e| e.start);
                builder.reserve(events.len())?;
                let ids: HashSet<u64> = events.iter().map(|e| e.id).collect();
                for event in &events {
                    builder.push_event(event)?;
                }
                for flow in flows.into_iter().filter(|f| ids.contains(&f.source_id)) {
                    builder.push_flow(flow)?;
                }
            }
        }
        Ok(builder.build())
    }

    pub fn track_id(&self) -> u32 {
        self.track
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// Start of the window this chunk was requested for.
    pub fn tag(&self) -> u64 {
        self.window.start
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    pub fn flows(&self) -> &[RawFlow] {
        &self.flows
    }

    pub fn strings(&self) -> &Arc<StringTable> {
        &self.strings
    }

    /// Index of the first record whose timestamp is `>= ts`.
    pub fn index_at_or_after(&self, ts: u64) -> Option<usize> {
        let len = self.records.len();
        let index = match &self.records {
            Records::Metrics(r) => r.partition_point(|s| s.timestamp < ts),
            Records::Events(r) => r.partition_point(|e| e.start < ts),
        };
        (index < len).then_some(index)
    }

    fn check(&self, index: usize) -> Result<()> {
        let len = self.records.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        Ok(())
    }

    pub fn timestamp_at(&self, index: usize) -> Result<u64> {
        self.check(index)?;
        Ok(self.records.timestamp(index))
    }

    pub fn value_at(&self, index: usize) -> Result<f64> {
        self.check(index)?;
        match &self.records {
            Records::Metrics(r) => Ok(r[index].value),
            Records::Events(_) => Err(Error::InvalidType),
        }
    }

    fn event_at(&self, index: usize) -> Result<&KernelEventRecord> {
        self.check(index)?;
        match &self.records {
            Records::Events(r) => Ok(&r[index]),
            Records::Metrics(_) => Err(Error::InvalidType),
        }
    }

    pub fn id_at(&self, index: usize) -> Result<u64> {
        self.event_at(index).map(|e| e.id)
    }

    pub fn duration_at(&self, index: usize) -> Result<u64> {
        self.event_at(index).map(|e| e.duration)
    }

    pub fn type_at(&self, index: usize) -> Result<Arc<str>> {
        let id = self.event_at(index)?.type_id;
        self.resolve(id)
    }

    pub fn description_at(&self, index: usize) -> Result<Arc<str>> {
        let id = self.event_at(index)?.description_id;
        self.resolve(id)
    }

    fn resolve(&self, id: StringId) -> Result<Arc<str>> {
        self.strings
            .get(id)
            .ok_or_else(|| Error::invalid(format!("unknown string id {}", id)))
    }

    /// Earliest timestamp held, if any.
    pub fn min_time(&self) -> Option<u64> {
        self.timestamp_at(0).ok()
    }

    /// Latest timestamp or event end held, if any.
    pub fn max_time(&self) -> Option<u64> {
        match &self.records {
            Records::Metrics(r) => r.last().map(|s| s.timestamp),
            Records::Events(r) => r.iter().map(KernelEventRecord::end).max(),
        }
    }

    pub fn memory_footprint(&self) -> usize {
        size_of::<Chunk>()
            + self.records.footprint()
            + self.flows.capacity() * size_of::<RawFlow>()
    }
}

/// Appends records in timestamp order. Every push either lands completely or
/// leaves the builder unchanged.
pub struct ChunkBuilder {
    track: u32,
    window: Window,
    records: Records,
    flows: Vec<RawFlow>,
    strings: Arc<StringTable>,
}

impl ChunkBuilder {
    pub fn new(track: u32, window: Window, kind: TrackKind, strings: Arc<StringTable>) -> Self {
        let records = match kind {
            TrackKind::Metric => Records::Metrics(Vec::new()),
            TrackKind::KernelLaunch | TrackKind::KernelExecute => Records::Events(Vec::new()),
        };
        Self {
            track,
            window,
            records,
            flows: Vec::new(),
            strings,
        }
    }

    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let reserved = match &mut self.records {
            Records::Metrics(r) => r.try_reserve(additional),
            Records::Events(r) => r.try_reserve(additional),
        };
        reserved.map_err(|_| Error::AllocFailure)
    }

    fn check_order(&self, ts: u64) -> Result<()> {
        let len = self.records.len();
        if len > 0 && self.records.timestamp(len - 1) > ts {
            return Err(Error::invalid(format!(
                "record at {} appended after {}",
                ts,
                self.records.timestamp(len - 1)
            )));
        }
        Ok(())
    }

    pub fn push_metric(&mut self, sample: MetricRecord) -> Result<()> {
        self.check_order(sample.timestamp)?;
        match &mut self.records {
            Records::Metrics(r) => {
                r.try_reserve(1).map_err(|_| Error::AllocFailure)?;
                r.push(sample);
                Ok(())
            }
            Records::Events(_) => Err(Error::InvalidType),
        }
    }

    pub fn push_event(&mut self, event: &RawEvent) -> Result<()> {
        self.check_order(event.start)?;
        let Records::Events(records) = &mut self.records else {
            return Err(Error::InvalidType);
        };
        records.try_reserve(1).map_err(|_| Error::AllocFailure)?;

        let mut writer = self.strings.writer();
        let type_id = writer.reserve(&event.type_name)?;
        let description_id = writer.reserve(&event.description)?;
        drop(writer);

        records.push(KernelEventRecord {
            id: event.id,
            start: event.start,
            duration: event.duration,
            type_id,
            description_id,
        });
        Ok(())
    }

    pub fn push_flow(&mut self, flow: RawFlow) -> Result<()> {
        self.flows.try_reserve(1).map_err(|_| Error::AllocFailure)?;
        self.flows.push(flow);
        Ok(())
    }

    pub fn build(self) -> Chunk {
        Chunk {
            track: self.track,
            window: self.window,
            records: self.records,
            flows: self.flows,
            strings: self.strings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    fn event(id: u64, start: u64, duration: u64, name: &str) -> RawEvent {
        RawEvent {
            id,
            start,
            duration,
            type_name: "KERNEL_DISPATCH".to_string(),
            description: name.to_string(),
        }
    }

    #[fixture]
    fn samples() -> Chunk {
        let data = ChunkData {
            track: 0,
            window_start: 0,
            window_end: 100,
            records: ChunkRecords::Metrics(
                [20, 0, 30, 10]
                    .into_iter()
                    .map(|t| MetricRecord {
                        timestamp: t,
                        value: t as f64 / 10.0,
                    })
                    .collect(),
            ),
        };
        let window = Window { start: 0, end: 100 };
        Chunk::from_data(data, TrackKind::Metric, window, &Arc::new(StringTable::new())).unwrap()
    }

    #[rstest]
    #[case(0, Some(0))]
    #[case(15, Some(2))]
    #[case(30, Some(3))]
    #[case(31, None)]
    fn test_index_at_or_after(samples: Chunk, #[case] ts: u64, #[case] expected: Option<usize>) {
        assert_eq!(samples.index_at_or_after(ts), expected);
    }

    #[rstest]
    fn test_sorted_on_load(samples: Chunk) {
        let ts: Vec<u64> = (0..4).map(|i| samples.timestamp_at(i).unwrap()).collect();
        assert_eq!(ts, vec![0, 10, 20, 30]);
        assert_eq!(samples.value_at(2).unwrap(), 2.0);
        assert_eq!(samples.tag(), 0);
        assert_eq!(samples.min_time(), Some(0));
        assert_eq!(samples.max_time(), Some(30));
    }

    #[rstest]
    fn test_out_of_range(samples: Chunk) {
        assert_eq!(
            samples.timestamp_at(4),
            Err(Error::IndexOutOfRange { index: 4, len: 4 })
        );
        assert_eq!(samples.id_at(0), Err(Error::InvalidType));
    }

    #[test]
    fn test_events_filtered_to_window() {
        let strings = Arc::new(StringTable::new());
        let data = ChunkData {
            track: 3,
            window_start: 100,
            window_end: 200,
            records: ChunkRecords::Events {
                events: vec![
                    event(1, 150, 10, "b"),
                    event(2, 90, 30, "outside"),
                    event(3, 100, 500, "a"),
                ],
                flows: vec![
                    RawFlow {
                        source_id: 1,
                        target_track: 1,
                        target_id: 7,
                        target_timestamp: 160,
                    },
                    RawFlow {
                        source_id: 2,
                        target_track: 1,
                        target_id: 8,
                        target_timestamp: 95,
                    },
                ],
            },
        };
        let window = Window {
            start: 100,
            end: 200,
        };
        let chunk = Chunk::from_data(data, TrackKind::KernelLaunch, window, &strings).unwrap();

        assert_eq!(chunk.record_count(), 2);
        assert_eq!(chunk.id_at(0).unwrap(), 3);
        assert_eq!(&*chunk.description_at(1).unwrap(), "b");
        assert_eq!(&*chunk.type_at(0).unwrap(), "KERNEL_DISPATCH");
        assert_eq!(chunk.max_time(), Some(600));
        assert_eq!(chunk.flows().len(), 1);
        assert_eq!(strings.len(), 3);
    }

    #[test]
    fn test_builder_rejects_unordered_append() {
        let window = Window { start: 0, end: 10 };
        let mut builder =
            ChunkBuilder::new(0, window, TrackKind::Metric, Arc::new(StringTable::new()));
        builder
            .push_metric(MetricRecord {
                timestamp: 5,
                value: 1.0,
            })
            .unwrap();
        let err = builder.push_metric(MetricRecord {
            timestamp: 4,
            value: 1.0,
        });
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
        assert_eq!(builder.build().record_count(), 1);
    }
}
