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

mod common;

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use common::{event, execute_track, flow, launch_track, metric_track, mixed_archive};
use eyre::Result;
use protocol::TraceArchive;
use rstest::{fixture, rstest};
use tracedata::{
    ChunkState, EndpointInfo, Error, MemoryDatabase, RangeRecords, Trace,
};

fn open(archive: TraceArchive, chunk_duration: u64) -> Result<Trace> {
    Ok(Trace::open(
        Box::new(MemoryDatabase::new(archive)),
        chunk_duration,
    )?)
}

#[fixture]
fn mixed() -> Trace {
    open(mixed_archive(), 100).expect("failed to open mixed trace")
}

#[rstest]
fn test_index_at_or_after_scenario() -> Result<()> {
    let archive = TraceArchive::new(vec![metric_track(
        0,
        "busy",
        &[(0, 1.0), (10, 2.0), (20, 3.0), (30, 4.0)],
    )]);
    let trace = open(archive, 1000)?;
    let chunk = trace.chunk_covering(0, 0)?;

    let index = chunk.index_at_or_after(15);
    assert_eq!(index, Some(2));
    assert_eq!(chunk.timestamp_at(2)?, 20);
    assert_eq!(chunk.value_at(2)?, 3.0);
    assert_eq!(chunk.index_at_or_after(31), None);
    Ok(())
}

#[rstest]
fn test_flow_endpoint_scenario() -> Result<()> {
    let archive = TraceArchive::new(vec![
        launch_track(7, vec![event(1, 0, 50, "launch")], vec![flow(1, 1, 1, 5)]),
        execute_track(0, vec![event(1, 5, 10, "kernel")], vec![flow(1, 0, 1, 0)]),
    ]);
    let trace = open(archive, 100)?;

    assert_eq!(trace.flow_endpoint(0, 1, 0), Err(Error::NotLoaded));
    trace.chunk_covering(0, 0)?;

    let endpoint = trace.flow_endpoint(0, 1, 0)?.expect("flow for event 1");
    assert_eq!(endpoint.track_id(), 1);
    assert_eq!(endpoint.timestamp(), 5);
    assert_eq!(endpoint.info(), EndpointInfo::LastTimestamp(5));
    assert_eq!(trace.flow_endpoint(0, 999, 0)?, None);
    assert_eq!(trace.number_of_flow_records(0)?, 1);
    assert!(trace.flow_memory_footprint(0)? > 0);

    trace.chunk_covering(1, 5)?;
    let back = trace.flow_endpoint(1, 1, 5)?.expect("flow back to launch");
    assert_eq!(back.track_id(), 0);
    assert_eq!(back.info(), EndpointInfo::CorrelationId(1));
    Ok(())
}

#[rstest]
fn test_flow_index_dropped_on_eviction() -> Result<()> {
    let archive = TraceArchive::new(vec![
        launch_track(7, vec![event(1, 0, 50, "launch")], vec![flow(1, 1, 1, 5)]),
        execute_track(0, vec![event(1, 5, 10, "kernel")], Vec::new()),
    ]);
    let trace = open(archive, 100)?;
    trace.chunk_covering(0, 0)?;
    assert!(trace.flow_endpoint(0, 1, 0)?.is_some());

    trace.delete_chunks_at(0);
    assert_eq!(trace.flow_endpoint(0, 1, 0), Err(Error::NotLoaded));
    Ok(())
}

#[rstest]
fn test_resident_chunks_are_ordered(mixed: Trace) -> Result<()> {
    mixed.preload(mixed.min_time(), mixed.max_time())?;
    for track in mixed.tracks() {
        let chunks = track.resident_chunks();
        assert!(!chunks.is_empty());
        let mut last_ts = 0;
        let mut last_window_end = 0;
        for chunk in &chunks {
            assert!(chunk.window().start >= last_window_end);
            last_window_end = chunk.window().end;
            for i in 0..chunk.record_count() {
                let ts = chunk.timestamp_at(i)?;
                assert!(ts >= last_ts);
                assert!(chunk.window().contains(ts));
                last_ts = ts;
            }
        }
    }
    Ok(())
}

fn ids(records: &RangeRecords) -> Vec<u64> {
    match records {
        RangeRecords::Events(events) => events.iter().map(|e| e.id).collect(),
        RangeRecords::Metrics(samples) => samples.iter().map(|s| s.timestamp).collect(),
    }
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
fn test_range_partition_law(mixed: Trace, #[case] track: u32) -> Result<()> {
    let (min, max) = (mixed.min_time(), mixed.max_time());
    let full = ids(&mixed.records_in_range(track, min, max)?);
    let unique: BTreeSet<u64> = full.iter().copied().collect();
    assert_eq!(unique.len(), full.len());

    let cuts = [min, 137, 400, 401, 733, max];
    let mut union = BTreeSet::new();
    let mut from = cuts[0];
    for &to in &cuts[1..] {
        for id in ids(&mixed.records_in_range(track, from, to)?) {
            union.insert(id);
        }
        from = to + 1;
    }
    assert_eq!(union, unique);
    Ok(())
}

#[rstest]
fn test_events_overlapping_window_start(mixed: Trace) -> Result<()> {
    let RangeRecords::Events(events) = mixed.records_in_range(1, 500, 520)? else {
        panic!("execution track holds events");
    };
    assert!(events.iter().all(|e| e.start <= 520 && e.end() >= 500));
    assert!(events.iter().any(|e| e.start < 500));
    Ok(())
}

#[rstest]
fn test_eviction_reloads_identical_data() -> Result<()> {
    let db = MemoryDatabase::new(mixed_archive());
    let stats = db.stats();
    let trace = Trace::open(Box::new(db), 100)?;

    let held = trace.chunk_covering(2, 250)?;
    let before: Vec<u64> = (0..held.record_count())
        .map(|i| held.timestamp_at(i))
        .collect::<Result<_, _>>()?;
    assert_eq!(trace.delete_chunks_at(250), 1);

    assert_eq!(trace.resident_chunk_at(2, 250).unwrap_err(), Error::NotLoaded);
    assert_eq!(trace.tracks()[2].chunk_state(250), ChunkState::Evicted);
    assert_eq!(held.timestamp_at(0)?, before[0]);

    let reloaded = trace.chunk_covering(2, 250)?;
    let after: Vec<u64> = (0..reloaded.record_count())
        .map(|i| reloaded.timestamp_at(i))
        .collect::<Result<_, _>>()?;
    assert_eq!(before, after);
    assert_eq!(stats.chunk_reads(), 2);
    Ok(())
}

#[rstest]
fn test_concurrent_range_queries_load_once() -> Result<()> {
    let db = MemoryDatabase::new(mixed_archive()).with_latency(Duration::from_millis(30));
    let stats = db.stats();
    let trace = Trace::open(Box::new(db), 1000)?;

    thread::scope(|s| {
        for _ in 0..6 {
            s.spawn(|| trace.records_in_range(2, 0, 900).map(|r| r.len()));
        }
    });
    assert_eq!(stats.track_reads(), 1);
    assert_eq!(trace.tracks()[2].chunk_count(), 1);
    Ok(())
}

#[rstest]
fn test_preload_uses_one_read_per_window(mixed: Trace) -> Result<()> {
    let loaded = mixed.preload(0, 199)?;
    assert_eq!(loaded, 6);
    assert_eq!(mixed.preload(0, 199)?, 0);
    assert!(mixed.string_item_count() > 0);
    assert!(mixed.string_table_size() >= mixed.strings().payload_bytes());
    Ok(())
}
