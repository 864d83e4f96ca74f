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

//! Trace data engine for a GPU profiler timeline.
//!
//! A [`Trace`] is bound to a [`Database`] and exposes one [`Track`] per
//! producer: CPU threads launching kernels, GPU queues executing them, and
//! metric series. Tracks load their records lazily in fixed-width time
//! windows ([`Chunk`]s), coalescing concurrent loads of the same window and
//! evicting on request. The [`Controller`] serves range, graph and table
//! fetches on background workers through [`Future`]s and [`Array`]s.

pub mod arguments;
pub mod array;
pub mod chunk;
pub mod config;
pub mod controller;
pub mod database;
pub mod error;
pub mod flow;
pub mod future;
pub mod handle;
pub mod trace;
pub mod track;

pub use arguments::{ArgumentKey, Arguments};
pub use array::{Array, Entry, PrimitiveType, Property, Value};
pub use chunk::{Chunk, Window};
pub use config::{Config, EngineConfig};
pub use controller::{
    Column, Controller, GraphHandle, SortOrder, TableHandle, TableKind, TraceHandle, TrackHandle,
};
pub use database::{ArchiveDatabase, Database, MemoryDatabase, Progress, ReadSession};
pub use error::{Error, Result, ResultCode};
pub use flow::{EndpointInfo, FlowEndpoint};
pub use future::{Future, FutureState};
pub use trace::{RangeRecords, Trace};
pub use track::{ChunkState, Track};
