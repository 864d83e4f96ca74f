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

//! Records exchanged between a trace database and the trace data engine.
//!
//! Everything here is plain data: the database materializes these values and
//! the engine copies them into its own chunk storage. All types derive the
//! `rkyv` traits so a whole trace can be written to and read back from a
//! single archive file.

use rkyv::{Archive, Deserialize, Serialize};

/// Bumped whenever the layout of [`TraceArchive`] changes.
pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum TrackKind {
    Metric,
    KernelLaunch,
    KernelExecute,
}

/// Producer coordinates of a track, as recorded by the profiler.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub enum TrackSource {
    Cpu { process_id: u32, thread_id: u32 },
    Gpu { gpu_id: u32, queue_id: u32 },
    Metric { gpu_id: u32, name: String },
}

impl TrackSource {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackSource::Cpu { .. } => TrackKind::KernelLaunch,
            TrackSource::Gpu { .. } => TrackKind::KernelExecute,
            TrackSource::Metric { .. } => TrackKind::Metric,
        }
    }

    pub fn group_name(&self) -> String {
        match self {
            TrackSource::Cpu { process_id, .. } => format!("PID {}", process_id),
            TrackSource::Gpu { gpu_id, .. } | TrackSource::Metric { gpu_id, .. } => {
                format!("GPU {}", gpu_id)
            }
        }
    }

    pub fn name(&self) -> String {
        match self {
            TrackSource::Cpu { thread_id, .. } => format!("TID {}", thread_id),
            TrackSource::Gpu { queue_id, .. } => format!("Queue {}", queue_id),
            TrackSource::Metric { name, .. } => name.clone(),
        }
    }
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub struct TrackProperties {
    pub source: TrackSource,
    pub record_count: u64,
    pub min_time: u64,
    pub max_time: u64,
    /// Longest event duration on the track, zero for metric tracks.
    pub max_duration: u64,
}

impl TrackProperties {
    pub fn kind(&self) -> TrackKind {
        self.source.kind()
    }
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[rkyv(derive(Debug))]
pub struct MetricRecord {
    pub timestamp: u64,
    pub value: f64,
}

/// A kernel launch or kernel execution as produced by the database. Strings
/// are interned by the engine when the chunk is loaded.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub struct RawEvent {
    pub id: u64,
    pub start: u64,
    pub duration: u64,
    pub type_name: String,
    pub description: String,
}

impl RawEvent {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.duration)
    }
}

/// Correlation between an event on the owning track and its counterpart on
/// `target_track`. One source id may appear several times for graph launches.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub struct RawFlow {
    pub source_id: u64,
    pub target_track: u32,
    pub target_id: u64,
    pub target_timestamp: u64,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub enum ChunkRecords {
    Metrics(Vec<MetricRecord>),
    Events {
        events: Vec<RawEvent>,
        flows: Vec<RawFlow>,
    },
}

impl ChunkRecords {
    pub fn empty_for(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Metric => ChunkRecords::Metrics(Vec::new()),
            TrackKind::KernelLaunch | TrackKind::KernelExecute => ChunkRecords::Events {
                events: Vec::new(),
                flows: Vec::new(),
            },
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ChunkRecords::Metrics(samples) => samples.len(),
            ChunkRecords::Events { events, .. } => events.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Records of one track for the half-open window `[window_start, window_end)`.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct ChunkData {
    pub track: u32,
    pub window_start: u64,
    pub window_end: u64,
    pub records: ChunkRecords,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct TraceProperties {
    pub min_time: u64,
    pub max_time: u64,
    pub tracks: Vec<TrackProperties>,
    /// Expected number of distinct strings, used to presize the string table.
    pub string_count_hint: u64,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct TrackArchive {
    pub source: TrackSource,
    pub records: ChunkRecords,
}

/// A complete trace, stored track by track.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct TraceArchive {
    pub version: u32,
    pub tracks: Vec<TrackArchive>,
}

impl TraceArchive {
    pub fn new(tracks: Vec<TrackArchive>) -> Self {
        Self {
            version: ARCHIVE_VERSION,
            tracks,
        }
    }
}

impl Default for TraceArchive {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
