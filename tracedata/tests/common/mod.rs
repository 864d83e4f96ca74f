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

#![allow(dead_code)]

use protocol::{
    ChunkRecords, MetricRecord, RawEvent, RawFlow, TraceArchive, TrackArchive, TrackSource,
};

pub fn metric_track(gpu_id: u32, name: &str, samples: &[(u64, f64)]) -> TrackArchive {
    TrackArchive {
        source: TrackSource::Metric {
            gpu_id,
            name: name.to_string(),
        },
        records: ChunkRecords::Metrics(
            samples
                .iter()
                .map(|&(timestamp, value)| MetricRecord { timestamp, value })
                .collect(),
        ),
    }
}

pub fn event(id: u64, start: u64, duration: u64, description: &str) -> RawEvent {
    RawEvent {
        id,
        start,
        duration,
        type_name: "KERNEL_DISPATCH".to_string(),
        description: description.to_string(),
    }
}

pub fn flow(source_id: u64, target_track: u32, target_id: u64, target_timestamp: u64) -> RawFlow {
    RawFlow {
        source_id,
        target_track,
        target_id,
        target_timestamp,
    }
}

pub fn launch_track(thread_id: u32, events: Vec<RawEvent>, flows: Vec<RawFlow>) -> TrackArchive {
    TrackArchive {
        source: TrackSource::Cpu {
            process_id: 1,
            thread_id,
        },
        records: ChunkRecords::Events { events, flows },
    }
}

pub fn execute_track(queue_id: u32, events: Vec<RawEvent>, flows: Vec<RawFlow>) -> TrackArchive {
    TrackArchive {
        source: TrackSource::Gpu {
            gpu_id: 0,
            queue_id,
        },
        records: ChunkRecords::Events { events, flows },
    }
}

/// A launch track, an execution track and a metric track with events that
/// straddle chunk boundaries when chunks are 100 ns wide.
pub fn mixed_archive() -> TraceArchive {
    let launches = (0..40u64)
        .map(|i| event(i, i * 25, (i % 7) * 30 + 1, &format!("launch {}", i % 3)))
        .collect();
    let executions = (0..40u64)
        .map(|i| event(1000 + i, i * 25 + 5, (i % 5) * 60 + 2, &format!("kernel {}", i % 4)))
        .collect();
    let samples: Vec<(u64, f64)> = (0..100u64).map(|i| (i * 10, (i % 13) as f64)).collect();
    TraceArchive::new(vec![
        launch_track(1, launches, Vec::new()),
        execute_track(0, executions, Vec::new()),
        metric_track(0, "busy", &samples),
    ])
}
