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

use std::time::Duration;

use common::{event, execute_track, launch_track, metric_track, mixed_archive};
use eyre::Result;
use protocol::TraceArchive;
use rstest::{fixture, rstest};
use tracedata::database::write_archive;
use tracedata::{
    ArchiveDatabase, Arguments, Array, Controller, EngineConfig, Entry, Error, Future,
    FutureState, MemoryDatabase, Property, ResultCode, SortOrder, TableKind, TraceHandle, Value,
};

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn controller(workers: usize) -> Controller {
    Controller::new(&EngineConfig {
        worker_threads: workers,
        chunk_duration_ns: 100,
    })
    .expect("failed to start controller")
}

struct Setup {
    controller: Controller,
    trace: TraceHandle,
}

#[fixture]
fn samples() -> Setup {
    let controller = controller(2);
    let archive = TraceArchive::new(vec![
        metric_track(0, "busy", &[(0, 5.0), (10, 1.0), (20, 3.0)]),
        metric_track(1, "busy", &[(10, 2.0), (30, 4.0)]),
        launch_track(3, vec![event(1, 0, 5, "hipLaunchKernel")], Vec::new()),
    ]);
    let trace = controller
        .open_trace(Box::new(MemoryDatabase::new(archive)))
        .expect("failed to open trace");
    Setup { controller, trace }
}

fn column(entry: &Entry, index: u64) -> Value {
    entry.get(Property::RowCell, index).expect("row cell")
}

fn run_table(setup: &Setup, args: &Arguments) -> Result<Vec<Entry>> {
    let table = setup.controller.create_table(setup.trace, TableKind::Samples)?;
    let (future, array) = (Future::new(), Array::new());
    setup
        .controller
        .table_fetch_async(table, args, &future, &array)?;
    future.wait(WAIT)?;
    setup.controller.free_table(table)?;
    Ok(array.entries())
}

#[rstest]
fn test_table_merges_tracks_by_timestamp(samples: Setup) -> Result<()> {
    let tracks = [
        samples.controller.track_handle(samples.trace, 0)?,
        samples.controller.track_handle(samples.trace, 1)?,
    ];
    let args = Arguments::table(TableKind::Samples, &tracks, 0, 100)
        .sorted_by(2, SortOrder::Ascending);
    let rows = run_table(&samples, &args)?;

    assert_eq!(rows.len(), 5);
    let order: Vec<(Value, Value)> = rows.iter().map(|r| (column(r, 2), column(r, 0))).collect();
    assert_eq!(
        order,
        vec![
            (Value::UInt64(0), Value::UInt64(0)),
            (Value::UInt64(10), Value::UInt64(0)),
            (Value::UInt64(10), Value::UInt64(1)),
            (Value::UInt64(20), Value::UInt64(0)),
            (Value::UInt64(30), Value::UInt64(1)),
        ]
    );
    assert_eq!(column(&rows[0], 1), Value::UInt64(1));
    assert_eq!(rows[0].get_u64(Property::RowTrack, 0)?, 0);
    Ok(())
}

#[rstest]
fn test_table_sort_is_repeatable(samples: Setup) -> Result<()> {
    let tracks = [
        samples.controller.track_handle(samples.trace, 1)?,
        samples.controller.track_handle(samples.trace, 0)?,
    ];
    let args = Arguments::table(TableKind::Samples, &tracks, 0, 100)
        .sorted_by(4, SortOrder::Descending);
    let first = run_table(&samples, &args)?;
    let second = run_table(&samples, &args)?;
    assert_eq!(first, second);

    let owners: Vec<Value> = first.iter().map(|r| column(r, 0)).collect();
    assert_eq!(
        owners,
        vec![
            Value::UInt64(0),
            Value::UInt64(0),
            Value::UInt64(0),
            Value::UInt64(1),
            Value::UInt64(1),
        ]
    );
    Ok(())
}

#[rstest]
fn test_table_descending_page(samples: Setup) -> Result<()> {
    let tracks = [
        samples.controller.track_handle(samples.trace, 0)?,
        samples.controller.track_handle(samples.trace, 1)?,
    ];
    let args = Arguments::table(TableKind::Samples, &tracks, 0, 100)
        .sorted_by(3, SortOrder::Descending)
        .page(1, 2);
    let rows = run_table(&samples, &args)?;
    let values: Vec<Value> = rows.iter().map(|r| column(r, 3)).collect();
    assert_eq!(values, vec![Value::Double(4.0), Value::Double(3.0)]);
    Ok(())
}

#[rstest]
fn test_table_rejects_wrong_track_kind(samples: Setup) -> Result<()> {
    let launch = samples.controller.track_handle(samples.trace, 2)?;
    let table = samples
        .controller
        .create_table(samples.trace, TableKind::Samples)?;
    let args = Arguments::table(TableKind::Samples, &[launch], 0, 100);
    let future = Future::new();
    let result = samples
        .controller
        .table_fetch_async(table, &args, &future, &Array::new());
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(ResultCode::from(&future.wait(WAIT)), ResultCode::InvalidArgument);
    assert_eq!(samples.controller.table_columns(table)?.len(), 5);
    Ok(())
}

#[rstest]
fn test_table_rejects_foreign_track(samples: Setup) -> Result<()> {
    let other = samples
        .controller
        .open_trace(Box::new(MemoryDatabase::new(mixed_archive())))?;
    let foreign = samples.controller.track_handle(other, 2)?;
    assert!(!samples.controller.validate_track(samples.trace, foreign));

    let table = samples
        .controller
        .create_table(samples.trace, TableKind::Samples)?;
    let args = Arguments::table(TableKind::Samples, &[foreign], 0, 100);
    let result = samples
        .controller
        .table_fetch_async(table, &args, &Future::new(), &Array::new());
    assert_eq!(result, Err(Error::InvalidHandle));
    Ok(())
}

#[rstest]
fn test_event_table_projection(samples: Setup) -> Result<()> {
    let launch = samples.controller.track_handle(samples.trace, 2)?;
    let table = samples
        .controller
        .create_table(samples.trace, TableKind::Events)?;
    let (future, array) = (Future::new(), Array::new());
    samples.controller.table_fetch_async(
        table,
        &Arguments::table(TableKind::Events, &[launch], 0, 100),
        &future,
        &array,
    )?;
    future.wait(WAIT)?;

    let row = array.get_object(Property::EntryIndexed, 0)?;
    assert_eq!(column(&row, 0), Value::UInt64(1));
    assert_eq!(column(&row, 2), Value::UInt64(5));
    assert_eq!(&*row.get_string(Property::RowCell, 3)?, "hipLaunchKernel");
    assert_eq!(&*row.get_string(Property::RowCell, 4)?, "KERNEL_DISPATCH");
    Ok(())
}

#[rstest]
#[case(1)]
#[case(5)]
#[case(64)]
fn test_graph_respects_point_budget(#[case] points: u32) -> Result<()> {
    let controller = controller(2);
    let trace = controller.open_trace(Box::new(MemoryDatabase::new(mixed_archive())))?;
    for index in 0..3 {
        let track = controller.track_handle(trace, index)?;
        let graph = controller.create_graph(track)?;
        let (future, array) = (Future::new(), Array::new());
        controller.graph_fetch_async(graph, 100, 899, points, &future, &array)?;
        future.wait(WAIT)?;

        assert!(!array.is_empty());
        assert!(array.len() <= points as usize);
        let bin_width = 800.0 / points as f64;
        let mut last_bin = None;
        for entry in array.entries() {
            let ts = entry.get_u64(Property::PointTimestamp, 0)?;
            assert!((100..=899).contains(&ts));
            let bin = ((ts - 100) as f64 / bin_width) as u64;
            assert!(last_bin.map_or(true, |last| bin > last));
            last_bin = Some(bin);
        }
        controller.free_graph(graph)?;
    }
    Ok(())
}

#[rstest]
fn test_wait_times_out_then_completes() -> Result<()> {
    let controller = controller(1);
    let db = MemoryDatabase::new(mixed_archive()).with_latency(Duration::from_millis(200));
    let trace = controller.open_trace(Box::new(db))?;
    let track = controller.track_handle(trace, 2)?;

    let (future, array) = (Future::new(), Array::new());
    controller.track_fetch_async(track, 0, 99, &future, &array)?;
    assert_eq!(future.wait(Some(Duration::from_millis(1))), Err(Error::Timeout));
    future.wait(WAIT)?;
    assert_eq!(future.state(), FutureState::Completed(Ok(())));
    assert_eq!(array.len(), 10);
    Ok(())
}

#[rstest]
fn test_cancelled_fetch_is_skipped() -> Result<()> {
    let controller = controller(1);
    let db = MemoryDatabase::new(mixed_archive()).with_latency(Duration::from_millis(100));
    let trace = controller.open_trace(Box::new(db))?;
    let track = controller.track_handle(trace, 2)?;

    let (slow, slow_array) = (Future::new(), Array::new());
    controller.track_fetch_async(track, 0, 99, &slow, &slow_array)?;
    let (queued, queued_array) = (Future::new(), Array::new());
    controller.track_fetch_async(track, 100, 199, &queued, &queued_array)?;
    assert!(queued.cancel());
    assert_eq!(queued.wait(WAIT), Err(Error::Cancelled));

    slow.wait(WAIT)?;
    drop(controller);
    assert!(!queued_array.is_busy());
    assert!(queued_array.is_empty());
    Ok(())
}

#[rstest]
fn test_archive_roundtrip_through_controller() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("trace.rkyv");
    let archive = TraceArchive::new(vec![
        execute_track(2, vec![event(9, 40, 20, "gemm")], Vec::new()),
        metric_track(0, "power", &[(40, 1.5), (55, 2.5)]),
    ]);
    write_archive(&archive, &path)?;

    let controller = controller(2);
    let trace = controller.open_trace(Box::new(ArchiveDatabase::open(&path)?))?;
    let info = controller.trace(trace)?;
    assert_eq!(info.min_time(), 40);
    assert_eq!(info.max_time(), 60);
    assert_eq!(info.tracks()[0].name(), "Queue 2");
    assert_eq!(info.tracks()[1].group_name(), "GPU 0");

    let track = controller.track_handle(trace, 0)?;
    let (future, array) = (Future::new(), Array::new());
    controller.track_fetch_async(track, 50, 50, &future, &array)?;
    future.wait(WAIT)?;
    let event = array.get_object(Property::EntryIndexed, 0)?;
    assert_eq!(event.get_u64(Property::EventId, 0)?, 9);
    assert_eq!(event.get_u64(Property::EventEnd, 0)?, 60);
    assert_eq!(&*event.get_string(Property::EventName, 0)?, "gemm");
    assert_eq!(event.get_u64(Property::EventNumChildren, 0)?, 0);
    Ok(())
}
