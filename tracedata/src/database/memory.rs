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

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use protocol::{
    ChunkData, ChunkRecords, MetricRecord, RawEvent, TraceArchive, TraceProperties,
    TrackArchive, TrackProperties,
};
use tracing::debug;

use super::{Database, ReadConfig, ReadSession};
use crate::{Error, Result};

/// Counters shared with whoever created the database, so reads can be
/// observed after the database has been handed to a trace.
#[derive(Debug, Clone, Default)]
pub struct ReadStats {
    chunk_reads: Arc<AtomicUsize>,
    track_reads: Arc<AtomicUsize>,
}

impl ReadStats {
    pub fn chunk_reads(&self) -> usize {
        self.chunk_reads.load(Ordering::SeqCst)
    }

    pub fn track_reads(&self) -> usize {
        self.track_reads.load(Ordering::SeqCst)
    }
}

/// Serves a trace that is fully held in memory.
pub struct MemoryDatabase {
    tracks: Arc<Vec<TrackArchive>>,
    config: ReadConfig,
    stats: ReadStats,
    latency: Duration,
    closed: bool,
}

impl MemoryDatabase {
    pub fn new(archive: TraceArchive) -> Self {
        Self {
            tracks: Arc::new(archive.tracks),
            config: ReadConfig::default(),
            stats: ReadStats::default(),
            latency: Duration::ZERO,
            closed: false,
        }
    }

    /// Delays every track read, mimicking slow storage.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn stats(&self) -> ReadStats {
        self.stats.clone()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Database("database is closed".into()));
        }
        Ok(())
    }

    fn chunk_read(&self, steps: ChunkSteps) -> Result<ReadSession<Vec<ChunkData>>> {
        self.ensure_open()?;
        self.config.check()?;
        if let Some(&bad) = self
            .config
            .tracks
            .iter()
            .find(|&&t| t as usize >= self.tracks.len())
        {
            return Err(Error::invalid(format!("unknown track {}", bad)));
        }
        self.stats.chunk_reads.fetch_add(1, Ordering::SeqCst);

        let ReadConfig { start, end, tracks } = self.config.clone();
        let mut session = ReadSession::new(Vec::with_capacity(tracks.len()));
        match steps {
            ChunkSteps::PerTrack => {
                for track in tracks {
                    let source = self.tracks.clone();
                    let stats = self.stats.clone();
                    let latency = self.latency;
                    session = session.step(
                        format!("Reading track {}", track),
                        move |out: &mut Vec<ChunkData>| {
                            thread::sleep(latency);
                            stats.track_reads.fetch_add(1, Ordering::SeqCst);
                            out.push(slice(track, &source[track as usize], start, end));
                            Ok(())
                        },
                    );
                }
            }
            ChunkSteps::AllTracks => {
                let source = self.tracks.clone();
                let stats = self.stats.clone();
                let latency = self.latency;
                session = session.step(
                    format!("Reading {} tracks", tracks.len()),
                    move |out: &mut Vec<ChunkData>| {
                        for track in tracks {
                            thread::sleep(latency);
                            stats.track_reads.fetch_add(1, Ordering::SeqCst);
                            out.push(slice(track, &source[track as usize], start, end));
                        }
                        Ok(())
                    },
                );
            }
        }
        Ok(session)
    }
}

enum ChunkSteps {
    PerTrack,
    AllTracks,
}

impl Database for MemoryDatabase {
    fn read_trace_properties(&mut self) -> Result<ReadSession<TraceProperties>> {
        self.ensure_open()?;
        let empty = TraceProperties {
            min_time: 0,
            max_time: 0,
            tracks: Vec::new(),
            string_count_hint: 0,
        };

        let tracks = self.tracks.clone();
        let strings = self.tracks.clone();
        Ok(ReadSession::new(empty)
            .step("Reading track properties", move |props: &mut TraceProperties| {
                props.tracks = tracks.iter().map(track_properties).collect();
                Ok(())
            })
            .step("Counting strings", move |props: &mut TraceProperties| {
                props.string_count_hint = count_strings(&strings) as u64;
                Ok(())
            })
            .step("Computing trace range", |props: &mut TraceProperties| {
                let populated = props.tracks.iter().filter(|t| t.record_count > 0);
                props.min_time = populated.clone().map(|t| t.min_time).min().unwrap_or(0);
                props.max_time = populated.map(|t| t.max_time).max().unwrap_or(0);
                Ok(())
            }))
    }

    fn configure_read_window(&mut self, start: u64, end: u64) {
        self.config.start = start;
        self.config.end = end;
    }

    fn add_track_to_read_config(&mut self, track: u32) {
        if !self.config.tracks.contains(&track) {
            self.config.tracks.push(track);
        }
    }

    fn reset_read_config(&mut self) {
        self.config = ReadConfig::default();
    }

    fn read_chunk_per_track(&mut self) -> Result<ReadSession<Vec<ChunkData>>> {
        self.chunk_read(ChunkSteps::PerTrack)
    }

    fn read_chunk_all_tracks(&mut self) -> Result<ReadSession<Vec<ChunkData>>> {
        self.chunk_read(ChunkSteps::AllTracks)
    }

    fn close(&mut self) {
        if !self.closed {
            debug!(tracks = self.tracks.len(), "closing in-memory database");
            self.closed = true;
        }
    }
}

fn track_properties(track: &TrackArchive) -> TrackProperties {
    let (record_count, min_time, max_time, max_duration) = match &track.records {
        ChunkRecords::Metrics(samples) => (
            samples.len(),
            samples.iter().map(|s| s.timestamp).min(),
            samples.iter().map(|s| s.timestamp).max(),
            0,
        ),
        ChunkRecords::Events { events, .. } => (
            events.len(),
            events.iter().map(|e| e.start).min(),
            events.iter().map(RawEvent::end).max(),
            events.iter().map(|e| e.duration).max().unwrap_or(0),
        ),
    };
    TrackProperties {
        source: track.source.clone(),
        record_count: record_count as u64,
        min_time: min_time.unwrap_or(0),
        max_time: max_time.unwrap_or(0),
        max_duration,
    }
}

fn count_strings(tracks: &[TrackArchive]) -> usize {
    let mut seen: HashSet<&str> = HashSet::new();
    for track in tracks {
        if let ChunkRecords::Events { events, .. } = &track.records {
            for event in events {
                seen.insert(&event.type_name);
                seen.insert(&event.description);
            }
        }
    }
    seen.len()
}

fn slice(track: u32, source: &TrackArchive, start: u64, end: u64) -> ChunkData {
    let inside = |ts: u64| start <= ts && ts < end;
    let records = match &source.records {
        ChunkRecords::Metrics(samples) => ChunkRecords::Metrics(
            samples
                .iter()
                .filter(|s| inside(s.timestamp))
                .copied()
                .collect::<Vec<MetricRecord>>(),
        ),
        ChunkRecords::Events { events, flows } => {
            let events: Vec<RawEvent> = events.iter().filter(|e| inside(e.start)).cloned().collect();
            let ids: HashSet<u64> = events.iter().map(|e| e.id).collect();
            let flows = flows
                .iter()
                .filter(|f| ids.contains(&f.source_id))
                .copied()
                .collect();
            ChunkRecords::Events { events, flows }
        }
    };
    ChunkData {
        track,
        window_start: start,
        window_end: end,
        records,
    }
}
