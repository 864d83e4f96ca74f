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

use std::iter::FusedIterator;
use std::mem::size_of;
use std::sync::Arc;

use interned_strings::StringTable;
use parking_lot::Mutex;
use protocol::{ChunkData, ChunkRecords, MetricRecord, TraceProperties, TrackKind};
use tracing::{debug, info, trace, warn};

use crate::chunk::{Chunk, KernelEventRecord, Records, Window};
use crate::database::{Database, Progress, ReadSession};
use crate::flow::{FlowEndpoint, FlowIndex};
use crate::track::{ChunkGrid, ChunkLoader, LoadClaim, Track};
use crate::{Error, Result};

/// Records of one track that overlap a queried range, in start order.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeRecords {
    Metrics(Vec<MetricRecord>),
    Events(Vec<KernelEventRecord>),
}

impl RangeRecords {
    pub fn len(&self) -> usize {
        match self {
            RangeRecords::Metrics(r) => r.len(),
            RangeRecords::Events(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A loaded trace: its tracks, their chunk caches, the string table and the
/// database everything is read from.
pub struct Trace {
    chunk_duration: u64,
    min_time: u64,
    max_time: u64,
    tracks: Vec<Track>,
    flows: Vec<Mutex<FlowIndex>>,
    strings: Arc<StringTable>,
    db: Mutex<Option<Box<dyn Database>>>,
}

impl Trace {
    pub fn new(chunk_duration: u64) -> Self {
        Self {
            chunk_duration: chunk_duration.max(1),
            min_time: 0,
            max_time: 0,
            tracks: Vec::new(),
            flows: Vec::new(),
            strings: Arc::new(StringTable::new()),
            db: Mutex::new(None),
        }
    }

    /// Binds `db` and reads the trace layout, driving the read to completion.
    pub fn open(db: Box<dyn Database>, chunk_duration: u64) -> Result<Self> {
        let mut trace = Trace::new(chunk_duration);
        let mut binding = trace.bind_database(db)?;
        for progress in binding.by_ref() {
            let progress = progress?;
            debug!(percent = progress.percent, "{}", progress.message);
        }
        binding.finish()?;
        Ok(trace)
    }

    /// Starts binding `db`. The trace only becomes usable once the returned
    /// [`Binding`] is finished; dropping it leaves the trace unbound.
    pub fn bind_database(&mut self, mut db: Box<dyn Database>) -> Result<Binding<'_>> {
        if self.is_bound() {
            return Err(Error::invalid("trace already has a database"));
        }
        let session = db.read_trace_properties()?;
        Ok(Binding {
            trace: self,
            db: Some(db),
            session,
        })
    }

    pub fn is_bound(&self) -> bool {
        self.db.lock().is_some()
    }

    fn install(&mut self, props: TraceProperties, db: Box<dyn Database>) -> Result<()> {
        if props.min_time > props.max_time {
            return Err(Error::Database(format!(
                "trace range {}..{} is inverted",
                props.min_time, props.max_time
            )));
        }
        let grid = ChunkGrid::new(props.min_time, props.max_time, self.chunk_duration);
        let hint = usize::try_from(props.string_count_hint).unwrap_or(0);

        self.min_time = props.min_time;
        self.max_time = props.max_time;
        self.strings = Arc::new(StringTable::with_capacity(hint));
        self.tracks = props
            .tracks
            .into_iter()
            .enumerate()
            .map(|(id, p)| Track::new(id as u32, p, grid))
            .collect();
        self.flows = self.tracks.iter().map(|_| Mutex::default()).collect();
        *self.db.get_mut() = Some(db);

        info!(
            tracks = self.tracks.len(),
            min_time = self.min_time,
            max_time = self.max_time,
            "trace bound"
        );
        Ok(())
    }

    pub fn min_time(&self) -> u64 {
        self.tracks
            .iter()
            .filter(|t| t.record_count() > 0)
            .map(Track::min_time)
            .min()
            .unwrap_or(self.min_time)
    }

    pub fn max_time(&self) -> u64 {
        self.tracks
            .iter()
            .filter(|t| t.record_count() > 0)
            .map(Track::max_time)
            .max()
            .unwrap_or(self.max_time)
    }

    pub fn chunk_duration(&self) -> u64 {
        self.chunk_duration
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: u32) -> Option<&Track> {
        self.tracks.get(index as usize)
    }

    fn track_or_err(&self, index: u32) -> Result<&Track> {
        self.track(index).ok_or(Error::IndexOutOfRange {
            index: index as usize,
            len: self.tracks.len(),
        })
    }

    pub fn strings(&self) -> &Arc<StringTable> {
        &self.strings
    }

    pub fn string_table_size(&self) -> usize {
        self.strings.memory_footprint()
    }

    pub fn string_item_count(&self) -> usize {
        self.strings.len()
    }

    pub fn memory_footprint(&self) -> usize {
        size_of::<Self>()
            + self.tracks.iter().map(Track::memory_footprint).sum::<usize>()
            + self.flows.iter().map(|f| f.lock().memory_footprint()).sum::<usize>()
            + self.string_table_size()
    }

    /// Footprint of the flow index of `track` as last built.
    pub fn flow_memory_footprint(&self, track: u32) -> Result<usize> {
        self.track_or_err(track)?;
        Ok(self.flows[track as usize].lock().memory_footprint())
    }

    pub fn number_of_flow_records(&self, track: u32) -> Result<usize> {
        self.track_or_err(track)?;
        Ok(self.flows[track as usize].lock().len())
    }

    /// Returns the chunk of `track` covering `ts`, loading it if needed.
    pub fn chunk_covering(&self, track: u32, ts: u64) -> Result<Arc<Chunk>> {
        self.track_or_err(track)?.chunk_covering(ts, self)
    }

    /// Returns the chunk of `track` covering `ts` only if it is resident.
    pub fn resident_chunk_at(&self, track: u32, ts: u64) -> Result<Arc<Chunk>> {
        self.track_or_err(track)?.resident_chunk_at(ts)
    }

    /// Loads every window intersecting `[start, end]` on every track, one
    /// database read per window. Returns the number of chunks made resident.
    pub fn preload(&self, start: u64, end: u64) -> Result<usize> {
        if start > end {
            return Err(Error::invalid(format!("start {} after end {}", start, end)));
        }
        let Some(first) = self.tracks.first() else {
            return Ok(0);
        };
        let mut loaded = 0;
        for window in first.grid().windows(start, end) {
            let claims: Vec<LoadClaim<'_>> =
                self.tracks.iter().filter_map(|t| t.try_claim(window)).collect();
            if claims.is_empty() {
                continue;
            }
            let ids: Vec<u32> = claims.iter().map(|c| c.track().id()).collect();
            let mut data = self.read_window(window, &ids, |db| db.read_chunk_all_tracks())?;
            for claim in claims {
                let track = claim.track();
                let chunk = self.build_chunk(track, claim.window(), take_track(&mut data, track.id()))?;
                claim.install(chunk);
                loaded += 1;
            }
        }
        debug!(start, end, loaded, "preloaded window");
        Ok(loaded)
    }

    /// Evicts every chunk tagged at or before `marker` on all tracks.
    pub fn delete_chunks_at(&self, marker: u64) -> usize {
        let mut evicted = 0;
        for (track, flows) in self.tracks.iter().zip(&self.flows) {
            let n = track.evict_chunks_marked(marker);
            if n > 0 {
                flows.lock().invalidate();
                evicted += n;
            }
        }
        evicted
    }

    /// Finds the far end of the flow starting at `event_id` on `track`. The
    /// chunk covering `ts` must be resident.
    pub fn flow_endpoint(&self, track: u32, event_id: u64, ts: u64) -> Result<Option<FlowEndpoint>> {
        let source = self.track_or_err(track)?;
        let (generation, chunks) = source.resident_snapshot();
        if !chunks.iter().any(|c| c.window().contains(ts)) {
            return Err(Error::NotLoaded);
        }
        let mut index = self.flows[track as usize].lock();
        if !index.is_current(generation) {
            index.rebuild(generation, &chunks, |t| self.track(t).map(Track::kind));
            trace!(track, generation, entries = index.len(), "flow index rebuilt");
        }
        Ok(index.get(event_id))
    }

    /// Records of `track` overlapping `[start, end]`. Samples are included
    /// when their timestamp is inside the range, events when any part of
    /// them is. The range is clamped to the trace.
    pub fn records_in_range(&self, track: u32, start: u64, end: u64) -> Result<RangeRecords> {
        if start > end {
            return Err(Error::invalid(format!("start {} after end {}", start, end)));
        }
        let source = self.track_or_err(track)?;
        let chunks = if start > self.max_time || end < self.min_time {
            Vec::new()
        } else {
            source.chunks_overlapping(start, end, self)?
        };

        match source.kind() {
            TrackKind::Metric => {
                let mut out = Vec::new();
                for chunk in &chunks {
                    let Records::Metrics(samples) = chunk.records() else {
                        continue;
                    };
                    let Some(first) = chunk.index_at_or_after(start) else {
                        continue;
                    };
                    let hits = &samples[first..];
                    let hits = &hits[..hits.partition_point(|s| s.timestamp <= end)];
                    out.try_reserve(hits.len()).map_err(|_| Error::AllocFailure)?;
                    out.extend_from_slice(hits);
                }
                Ok(RangeRecords::Metrics(out))
            }
            TrackKind::KernelLaunch | TrackKind::KernelExecute => {
                let mut out = Vec::new();
                for chunk in &chunks {
                    let Records::Events(events) = chunk.records() else {
                        continue;
                    };
                    for event in events.iter().take_while(|e| e.start <= end) {
                        if event.end() >= start {
                            out.try_reserve(1).map_err(|_| Error::AllocFailure)?;
                            out.push(*event);
                        }
                    }
                }
                Ok(RangeRecords::Events(out))
            }
        }
    }

    fn read_window<F>(&self, window: Window, tracks: &[u32], read: F) -> Result<Vec<ChunkData>>
    where
        F: FnOnce(&mut dyn Database) -> Result<ReadSession<Vec<ChunkData>>>,
    {
        let mut guard = self.db.lock();
        let db = guard
            .as_mut()
            .ok_or_else(|| Error::Database("no database bound".into()))?;
        db.reset_read_config();
        db.configure_read_window(window.start, window.end);
        for &track in tracks {
            db.add_track_to_read_config(track);
        }
        let result = read(&mut **db).and_then(drive);
        db.reset_read_config();
        result
    }

    fn build_chunk(&self, track: &Track, window: Window, data: Option<ChunkData>) -> Result<Chunk> {
        let data = data.unwrap_or_else(|| ChunkData {
            track: track.id(),
            window_start: window.start,
            window_end: window.end,
            records: ChunkRecords::empty_for(track.kind()),
        });
        Chunk::from_data(data, track.kind(), window, &self.strings)
    }
}

impl ChunkLoader for Trace {
    fn load_chunk(&self, track: &Track, window: Window) -> Result<Chunk> {
        let mut data =
            self.read_window(window, &[track.id()], |db| db.read_chunk_per_track())?;
        self.build_chunk(track, window, take_track(&mut data, track.id()))
    }
}

impl Drop for Trace {
    fn drop(&mut self) {
        if let Some(mut db) = self.db.get_mut().take() {
            db.close();
        }
    }
}

fn take_track(data: &mut Vec<ChunkData>, track: u32) -> Option<ChunkData> {
    let position = data.iter().position(|c| c.track == track)?;
    Some(data.swap_remove(position))
}

fn drive<T>(mut session: ReadSession<T>) -> Result<T> {
    for progress in session.by_ref() {
        let progress = progress?;
        trace!(percent = progress.percent, "{}", progress.message);
    }
    session.finish()
}

/// An in-progress bind of a database to a trace. Iterate for progress, then
/// call [`Binding::finish`].
pub struct Binding<'a> {
    trace: &'a mut Trace,
    db: Option<Box<dyn Database>>,
    session: ReadSession<TraceProperties>,
}

impl Binding<'_> {
    pub fn cancel(&mut self) {
        self.session.cancel();
    }

    pub fn finish(mut self) -> Result<()> {
        let db = self
            .db
            .take()
            .ok_or_else(|| Error::invalid("binding already finished"))?;
        let session = std::mem::replace(
            &mut self.session,
            ReadSession::new(TraceProperties {
                min_time: 0,
                max_time: 0,
                tracks: Vec::new(),
                string_count_hint: 0,
            }),
        );
        let props = session.finish()?;
        self.trace.install(props, db)
    }
}

impl Iterator for Binding<'_> {
    type Item = Result<Progress>;

    fn next(&mut self) -> Option<Self::Item> {
        self.session.next()
    }
}

impl FusedIterator for Binding<'_> {}

impl Drop for Binding<'_> {
    fn drop(&mut self) {
        if let Some(mut db) = self.db.take() {
            warn!("trace binding abandoned before completion");
            db.close();
        }
    }
}
