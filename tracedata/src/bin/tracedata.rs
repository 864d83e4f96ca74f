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

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use eyre::{Result, WrapErr};
use tracedata::{
    ArchiveDatabase, Arguments, Array, Config, Controller, Entry, Future, SortOrder,
    TableKind, TrackHandle, Value,
};

static LONG_VERSION: OnceLock<String> = OnceLock::new();

fn get_long_version() -> &'static str {
    LONG_VERSION.get_or_init(|| {
        format!(
            "{} (commit: {}, archive: {})",
            env!("CARGO_PKG_VERSION"),
            env!("TRACEDATA_GIT_REVISION"),
            protocol::ARCHIVE_VERSION
        )
    })
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TableArg {
    Events,
    Samples,
}

impl From<TableArg> for TableKind {
    fn from(arg: TableArg) -> Self {
        match arg {
            TableArg::Events => TableKind::Events,
            TableArg::Samples => TableKind::Samples,
        }
    }
}

#[derive(Parser)]
#[command(name = "tracedata")]
#[command(about = "inspect a gpu trace archive through the trace data engine")]
#[command(version = None, long_version = get_long_version())]
struct Args {
    #[arg(help = "trace archive path")]
    archive: PathBuf,

    #[arg(short, long, help = "configuration file path (toml format)")]
    config: Option<String>,

    #[arg(long, help = "start of the inspected range in ns (default: trace start)")]
    start: Option<u64>,

    #[arg(long, help = "end of the inspected range in ns (default: trace end)")]
    end: Option<u64>,

    #[arg(short, long, value_enum, help = "also fetch a table over all matching tracks")]
    table: Option<TableArg>,

    #[arg(short, long, default_value_t = 64, help = "graph points per track")]
    points: u32,

    #[arg(long, default_value_t = 20, help = "table rows to print")]
    rows: u64,

    #[arg(
        long,
        value_parser = humantime::parse_duration,
        default_value = "30s",
        help = "how long to wait for each fetch (e.g. 500ms, 10s)"
    )]
    timeout: Duration,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config path={}", path))?,
        None => Config::default(),
    };

    let controller = Controller::new(&config.engine).wrap_err("failed to start engine")?;
    let db = ArchiveDatabase::open(&args.archive)
        .with_context(|| format!("failed to open archive path={}", args.archive.display()))?;
    let handle = controller.open_trace(Box::new(db))?;
    let trace = controller.trace(handle)?;

    let start = args.start.unwrap_or_else(|| trace.min_time());
    let end = args.end.unwrap_or_else(|| trace.max_time());
    println!(
        "trace: {} tracks, {}..{} ns",
        trace.track_count(),
        trace.min_time(),
        trace.max_time()
    );

    let mut tracks: Vec<TrackHandle> = Vec::with_capacity(trace.track_count());
    for (index, track) in trace.tracks().iter().enumerate() {
        let track_handle = controller.track_handle(handle, index as u32)?;
        tracks.push(track_handle);

        let graph = controller.create_graph(track_handle)?;
        let (future, array) = (Future::new(), Array::new());
        controller.graph_fetch_async(graph, start, end, args.points, &future, &array)?;
        future
            .wait(Some(args.timeout))
            .with_context(|| format!("graph fetch failed track={}", index))?;
        controller.free_graph(graph)?;

        println!(
            "  [{}] {} / {} ({:?}): {} records, {} graph points",
            index,
            track.group_name(),
            track.name(),
            track.kind(),
            track.record_count(),
            array.len()
        );
    }

    if let Some(kind) = args.table.map(TableKind::from) {
        let matching: Vec<TrackHandle> = tracks
            .into_iter()
            .filter(|t| {
                trace
                    .track(t.index())
                    .is_some_and(|track| kind.accepts(track.kind()))
            })
            .collect();
        if matching.is_empty() {
            tracing::warn!(table = ?kind, "no tracks hold rows for this table");
        } else {
            let table = controller.create_table(handle, kind)?;
            let arguments = Arguments::table(kind, &matching, start, end)
                .sorted_by(kind.time_column() as u64, SortOrder::Ascending)
                .page(0, args.rows);
            let (future, array) = (Future::new(), Array::new());
            controller.table_fetch_async(table, &arguments, &future, &array)?;
            future
                .wait(Some(args.timeout))
                .wrap_err("table fetch failed")?;

            let columns = controller.table_columns(table)?;
            let header: Vec<&str> = columns.iter().map(|c| c.name).collect();
            println!("{}", header.join("\t"));
            for entry in array.entries() {
                if let Entry::Row(row) = entry {
                    let cells: Vec<String> = row.cells.iter().map(format_value).collect();
                    println!("{}", cells.join("\t"));
                }
            }
            controller.free_table(table)?;
        }
    }

    tracing::info!(
        chunks = trace.tracks().iter().map(|t| t.chunk_count()).sum::<usize>(),
        bytes = trace.memory_footprint(),
        strings = trace.string_item_count(),
        "done"
    );
    controller.destroy_trace(handle)?;
    Ok(())
}

fn format_value(value: &Value) -> String {
    match value {
        Value::UInt64(v) => v.to_string(),
        Value::Double(v) => format!("{:.3}", v),
        Value::String(s) => s.to_string(),
    }
}
