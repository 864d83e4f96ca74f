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

//! Handle-based asynchronous fetch surface.
//!
//! The [`Controller`] owns the registered traces, graphs and tables and a
//! pool of fetch workers. Every fetch returns as soon as its arguments are
//! validated; the work runs on a worker, fills the caller's [`Array`] and
//! completes the caller's [`Future`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::array::{Array, Entry};
use crate::arguments::Arguments;
use crate::config::EngineConfig;
use crate::database::Database;
use crate::future::Future;
use crate::handle::{Arena, Handle};
use crate::trace::Trace;
use crate::{Error, Result};

mod fetch;
mod graph;
mod table;
mod worker;

pub use table::{Column, SortOrder, TableKind};

use table::TableQuery;
use worker::WorkerPool;

pub type TraceHandle = Handle<Arc<Trace>>;
pub type GraphHandle = Handle<Graph>;
pub type TableHandle = Handle<Table>;

/// A track within a registered trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle {
    trace: TraceHandle,
    index: u32,
}

impl TrackHandle {
    pub fn trace(&self) -> TraceHandle {
        self.trace
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Graph {
    track: TrackHandle,
}

#[derive(Debug, Clone, Copy)]
pub struct Table {
    trace: TraceHandle,
    kind: TableKind,
}

#[derive(Default)]
struct Registry {
    traces: Arena<Arc<Trace>>,
    graphs: Arena<Graph>,
    tables: Arena<Table>,
}

pub struct Controller {
    registry: RwLock<Registry>,
    chunk_duration: u64,
    workers: WorkerPool,
}

impl Controller {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: RwLock::new(Registry::default()),
            chunk_duration: config.chunk_duration_ns,
            workers: WorkerPool::new(config.worker_threads)?,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.size()
    }

    /// Binds `db` to a new trace and registers it.
    pub fn open_trace(&self, db: Box<dyn Database>) -> Result<TraceHandle> {
        let trace = Trace::open(db, self.chunk_duration)?;
        self.bind_trace(trace)
    }

    pub fn bind_trace(&self, trace: Trace) -> Result<TraceHandle> {
        if !trace.is_bound() {
            return Err(Error::invalid("trace has no database"));
        }
        let handle = self.registry.write().traces.insert(Arc::new(trace));
        debug!(trace = ?handle, "trace registered");
        Ok(handle)
    }

    /// Unregisters a trace together with its graphs and tables. Fetches
    /// already running keep the trace alive until they finish.
    pub fn destroy_trace(&self, handle: TraceHandle) -> Result<()> {
        let mut registry = self.registry.write();
        registry
            .traces
            .remove(handle)
            .ok_or(Error::InvalidHandle)?;

        let graphs: Vec<GraphHandle> = registry
            .graphs
            .iter()
            .filter(|(_, g)| g.track.trace == handle)
            .map(|(h, _)| h)
            .collect();
        for graph in graphs {
            registry.graphs.remove(graph);
        }
        let tables: Vec<TableHandle> = registry
            .tables
            .iter()
            .filter(|(_, t)| t.trace == handle)
            .map(|(h, _)| h)
            .collect();
        for table in tables {
            registry.tables.remove(table);
        }
        debug!(trace = ?handle, "trace destroyed");
        Ok(())
    }

    pub fn trace(&self, handle: TraceHandle) -> Result<Arc<Trace>> {
        self.registry
            .read()
            .traces
            .get(handle)
            .cloned()
            .ok_or(Error::InvalidHandle)
    }

    pub fn track_handle(&self, trace: TraceHandle, index: u32) -> Result<TrackHandle> {
        let count = self.trace(trace)?.track_count();
        if index as usize >= count {
            return Err(Error::IndexOutOfRange {
                index: index as usize,
                len: count,
            });
        }
        Ok(TrackHandle { trace, index })
    }

    /// Whether `track` names a live track of `trace`.
    pub fn validate_track(&self, trace: TraceHandle, track: TrackHandle) -> bool {
        track.trace == trace
            && self
                .trace(trace)
                .map(|t| (track.index as usize) < t.track_count())
                .unwrap_or(false)
    }

    fn resolve_track(&self, track: TrackHandle) -> Result<Arc<Trace>> {
        let trace = self.trace(track.trace)?;
        if track.index as usize >= trace.track_count() {
            return Err(Error::InvalidHandle);
        }
        Ok(trace)
    }

    pub fn create_graph(&self, track: TrackHandle) -> Result<GraphHandle> {
        self.resolve_track(track)?;
        Ok(self.registry.write().graphs.insert(Graph { track }))
    }

    pub fn free_graph(&self, graph: GraphHandle) -> Result<()> {
        self.registry
            .write()
            .graphs
            .remove(graph)
            .map(|_| ())
            .ok_or(Error::InvalidHandle)
    }

    pub fn graph_track(&self, graph: GraphHandle) -> Result<TrackHandle> {
        self.registry
            .read()
            .graphs
            .get(graph)
            .map(|g| g.track)
            .ok_or(Error::InvalidHandle)
    }

    pub fn create_table(&self, trace: TraceHandle, kind: TableKind) -> Result<TableHandle> {
        self.trace(trace)?;
        Ok(self.registry.write().tables.insert(Table { trace, kind }))
    }

    pub fn free_table(&self, table: TableHandle) -> Result<()> {
        self.registry
            .write()
            .tables
            .remove(table)
            .map(|_| ())
            .ok_or(Error::InvalidHandle)
    }

    pub fn table_columns(&self, table: TableHandle) -> Result<&'static [Column]> {
        self.registry
            .read()
            .tables
            .get(table)
            .map(|t| t.kind.columns())
            .ok_or(Error::InvalidHandle)
    }

    /// Fetches every record of `track` overlapping `[start, end]`.
    pub fn track_fetch_async(
        &self,
        track: TrackHandle,
        start: u64,
        end: u64,
        future: &Future,
        array: &Array,
    ) -> Result<()> {
        let work = fetch::check_range(start, end)
            .and_then(|()| self.resolve_track(track))
            .map(|trace| {
                move || {
                    let records = trace.records_in_range(track.index, start, end)?;
                    fetch::project(&trace, track.index, records)
                }
            });
        self.submit(future, array, work)
    }

    /// Fetches `[start, end]` of the graph's track reduced to at most
    /// `points` entries.
    pub fn graph_fetch_async(
        &self,
        graph: GraphHandle,
        start: u64,
        end: u64,
        points: u32,
        future: &Future,
        array: &Array,
    ) -> Result<()> {
        let work = fetch::check_range(start, end)
            .and_then(|()| {
                if points == 0 {
                    return Err(Error::invalid("graph needs at least one point"));
                }
                self.graph_track(graph)
            })
            .and_then(|track| Ok((track, self.resolve_track(track)?)))
            .map(|(track, trace)| {
                move || -> Result<Vec<Entry>> {
                    let records = trace.records_in_range(track.index, start, end)?;
                    Ok(graph::downsample(track.index, &records, start, end, points)
                        .into_iter()
                        .map(Entry::Point)
                        .collect())
                }
            });
        self.submit(future, array, work)
    }

    /// Fetches a merged, sorted table. `args` is copied before returning.
    pub fn table_fetch_async(
        &self,
        table: TableHandle,
        args: &Arguments,
        future: &Future,
        array: &Array,
    ) -> Result<()> {
        let work = self.prepare_table(table, args).map(|(trace, tracks, query)| {
            move || table::build_rows(&trace, &tracks, &query)
        });
        self.submit(future, array, work)
    }

    fn prepare_table(
        &self,
        table: TableHandle,
        args: &Arguments,
    ) -> Result<(Arc<Trace>, Vec<u32>, TableQuery)> {
        let Table { trace: owner, kind } = *self
            .registry
            .read()
            .tables
            .get(table)
            .ok_or(Error::InvalidHandle)?;
        let trace = self.trace(owner)?;
        let query = TableQuery::parse(kind, args)?;

        let mut tracks = Vec::with_capacity(query.tracks.len());
        for handle in &query.tracks {
            if handle.trace != owner {
                return Err(Error::InvalidHandle);
            }
            let track = trace.track(handle.index).ok_or(Error::InvalidHandle)?;
            if !kind.accepts(track.kind()) {
                return Err(Error::invalid(format!(
                    "{:?} track {} cannot feed a {:?} table",
                    track.kind(),
                    handle.index,
                    kind
                )));
            }
            tracks.push(handle.index);
        }
        Ok((trace, tracks, query))
    }

    fn submit<W>(&self, future: &Future, array: &Array, work: Result<W>) -> Result<()>
    where
        W: FnOnce() -> Result<Vec<Entry>> + Send + 'static,
    {
        future.arm()?;
        let prepared = work.and_then(|work| Ok((work, array.begin_write()?)));
        let (work, mut writer) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                future.complete(Err(e.clone()));
                return Err(e);
            }
        };

        let future = future.clone();
        self.workers.submit(Box::new(move || {
            if future.is_cancelled() {
                debug!("skipping cancelled fetch");
                return;
            }
            writer.clear();
            let result = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(Ok(entries)) => writer.extend(entries),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    error!("fetch panicked");
                    Err(Error::Cancelled)
                }
            };
            match &result {
                Ok(()) | Err(Error::NotLoaded) => {}
                Err(e) => warn!(error = %e, "fetch failed"),
            }
            drop(writer);
            future.complete(result);
        }));
        Ok(())
    }
}
