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

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use protocol::{TrackKind, TrackProperties};
use tracing::{debug, trace};

use crate::chunk::{Chunk, Window};
use crate::{Error, Result};

/// Fixed-width windows aligned at the trace start. Every timestamp in
/// `[origin, last]` belongs to exactly one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkGrid {
    origin: u64,
    last: u64,
    width: u64,
}

impl ChunkGrid {
    pub fn new(origin: u64, last: u64, width: u64) -> Self {
        Self {
            origin,
            last: last.max(origin),
            width: width.max(1),
        }
    }

    pub fn width(&self) -> u64 {
        self.width
    }

    pub fn window_of(&self, ts: u64) -> Option<Window> {
        if ts < self.origin || ts > self.last {
            return None;
        }
        let start = self.origin + (ts - self.origin) / self.width * self.width;
        Some(Window {
            start,
            end: start.saturating_add(self.width),
        })
    }

    /// Windows intersecting `[start, end]`, in ascending order.
    pub fn windows(&self, start: u64, end: u64) -> impl Iterator<Item = Window> {
        let start = start.max(self.origin);
        let end = end.min(self.last);
        let width = self.width;
        let first = if start <= end { self.window_of(start) } else { None };
        std::iter::successors(first, move |w| {
            (w.end <= end && w.end > w.start).then(|| Window {
                start: w.end,
                end: w.end.saturating_add(width),
            })
        })
    }
}

/// Fills a window of a track from backing storage.
pub(crate) trait ChunkLoader {
    fn load_chunk(&self, track: &Track, window: Window) -> Result<Chunk>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Unloaded,
    Loading,
    Resident,
    Evicted,
}

enum Slot {
    Loading,
    Resident(Arc<Chunk>),
    Evicted,
}

#[derive(Default)]
struct Slots {
    windows: BTreeMap<u64, Slot>,
    /// Bumped whenever the resident set changes.
    generation: u64,
}

pub struct Track {
    id: u32,
    properties: TrackProperties,
    name: String,
    group_name: String,
    grid: ChunkGrid,
    slots: Mutex<Slots>,
    loaded: Condvar,
    last_acquired: Mutex<Weak<Chunk>>,
    seen_min: AtomicU64,
    seen_max: AtomicU64,
    seen_max_duration: AtomicU64,
}

impl Track {
    pub fn new(id: u32, properties: TrackProperties, grid: ChunkGrid) -> Self {
        let name = properties.source.name();
        let group_name = properties.source.group_name();
        Self {
            id,
            name,
            group_name,
            grid,
            slots: Mutex::new(Slots::default()),
            loaded: Condvar::new(),
            last_acquired: Mutex::new(Weak::new()),
            seen_min: AtomicU64::new(properties.min_time),
            seen_max: AtomicU64::new(properties.max_time),
            seen_max_duration: AtomicU64::new(properties.max_duration),
            properties,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.properties.kind()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn properties(&self) -> &TrackProperties {
        &self.properties
    }

    pub fn record_count(&self) -> u64 {
        self.properties.record_count
    }

    pub fn grid(&self) -> ChunkGrid {
        self.grid
    }

    pub fn min_time(&self) -> u64 {
        self.seen_min.load(Ordering::Relaxed)
    }

    pub fn max_time(&self) -> u64 {
        self.seen_max.load(Ordering::Relaxed)
    }

    pub fn max_duration(&self) -> u64 {
        self.seen_max_duration.load(Ordering::Relaxed)
    }

    pub fn generation(&self) -> u64 {
        self.slots.lock().generation
    }

    pub fn chunk_state(&self, ts: u64) -> ChunkState {
        let Some(window) = self.grid.window_of(ts) else {
            return ChunkState::Unloaded;
        };
        match self.slots.lock().windows.get(&window.start) {
            None => ChunkState::Unloaded,
            Some(Slot::Loading) => ChunkState::Loading,
            Some(Slot::Resident(_)) => ChunkState::Resident,
            Some(Slot::Evicted) => ChunkState::Evicted,
        }
    }

    /// Returns the chunk covering `ts` without touching storage.
    pub fn resident_chunk_at(&self, ts: u64) -> Result<Arc<Chunk>> {
        let window = self.grid.window_of(ts).ok_or(Error::NotLoaded)?;
        let chunk = match self.slots.lock().windows.get(&window.start) {
            Some(Slot::Resident(chunk)) => chunk.clone(),
            _ => return Err(Error::NotLoaded),
        };
        self.remember(&chunk);
        Ok(chunk)
    }

    /// Most recently handed out chunk, if it is still resident or held.
    pub fn last_acquired(&self) -> Option<Arc<Chunk>> {
        self.last_acquired.lock().upgrade()
    }

    pub fn resident_chunks(&self) -> Vec<Arc<Chunk>> {
        self.resident_snapshot().1
    }

    pub(crate) fn resident_snapshot(&self) -> (u64, Vec<Arc<Chunk>>) {
        let slots = self.slots.lock();
        let chunks = slots
            .windows
            .values()
            .filter_map(|slot| match slot {
                Slot::Resident(chunk) => Some(chunk.clone()),
                _ => None,
            })
            .collect();
        (slots.generation, chunks)
    }

    pub fn chunk_count(&self) -> usize {
        self.slots
            .lock()
            .windows
            .values()
            .filter(|slot| matches!(slot, Slot::Resident(_)))
            .count()
    }

    pub fn memory_footprint(&self) -> usize {
        self.resident_chunks()
            .iter()
            .map(|c| c.memory_footprint())
            .sum()
    }

    pub(crate) fn chunk_covering(&self, ts: u64, loader: &dyn ChunkLoader) -> Result<Arc<Chunk>> {
        let window = self.grid.window_of(ts).ok_or(Error::NotLoaded)?;
        self.acquire(window, loader)
    }

    /// Loads every chunk that can hold a record overlapping `[start, end]`.
    pub(crate) fn chunks_overlapping(
        &self,
        start: u64,
        end: u64,
        loader: &dyn ChunkLoader,
    ) -> Result<Vec<Arc<Chunk>>> {
        let from = match self.kind() {
            TrackKind::Metric => start,
            TrackKind::KernelLaunch | TrackKind::KernelExecute => {
                start.saturating_sub(self.max_duration())
            }
        };
        self.grid
            .windows(from, end)
            .map(|window| self.acquire(window, loader))
            .collect()
    }

    pub(crate) fn acquire(&self, window: Window, loader: &dyn ChunkLoader) -> Result<Arc<Chunk>> {
        let claim = {
            let mut slots = self.slots.lock();
            loop {
                match slots.windows.get(&window.start) {
                    Some(Slot::Resident(chunk)) => {
                        let chunk = chunk.clone();
                        drop(slots);
                        self.remember(&chunk);
                        return Ok(chunk);
                    }
                    Some(Slot::Loading) => {
                        trace!(track = self.id, window = window.start, "waiting for chunk load");
                        self.loaded.wait(&mut slots);
                        continue;
                    }
                    Some(Slot::Evicted) | None => {}
                }
                slots.windows.insert(window.start, Slot::Loading);
                break LoadClaim::new(self, window);
            }
        };
        let chunk = loader.load_chunk(self, window)?;
        Ok(claim.install(chunk))
    }

    /// Claims `window` for loading if nobody holds or is loading it.
    pub(crate) fn try_claim(&self, window: Window) -> Option<LoadClaim<'_>> {
        let mut slots = self.slots.lock();
        match slots.windows.get(&window.start) {
            Some(Slot::Resident(_)) | Some(Slot::Loading) => None,
            Some(Slot::Evicted) | None => {
                slots.windows.insert(window.start, Slot::Loading);
                Some(LoadClaim::new(self, window))
            }
        }
    }

    /// Drops resident chunks tagged at or before `marker`. Readers holding a
    /// chunk keep it alive until they release it.
    pub fn evict_chunks_marked(&self, marker: u64) -> usize {
        let mut slots = self.slots.lock();
        let mut evicted = 0;
        for (_, slot) in slots.windows.range_mut(..=marker) {
            if matches!(slot, Slot::Resident(_)) {
                *slot = Slot::Evicted;
                evicted += 1;
            }
        }
        if evicted > 0 {
            slots.generation += 1;
            debug!(track = self.id, marker, evicted, "evicted chunks");
        }
        evicted
    }

    fn remember(&self, chunk: &Arc<Chunk>) {
        *self.last_acquired.lock() = Arc::downgrade(chunk);
    }

    fn observe(&self, chunk: &Chunk) {
        if let Some(min) = chunk.min_time() {
            self.seen_min.fetch_min(min, Ordering::Relaxed);
        }
        if let Some(max) = chunk.max_time() {
            self.seen_max.fetch_max(max, Ordering::Relaxed);
        }
        if let crate::chunk::Records::Events(events) = chunk.records() {
            if let Some(longest) = events.iter().map(|e| e.duration).max() {
                self.seen_max_duration.fetch_max(longest, Ordering::Relaxed);
            }
        }
    }
}

/// Exclusive right to fill one window. Dropping it without installing puts
/// the window back to unloaded and wakes any waiters.
pub(crate) struct LoadClaim<'a> {
    track: &'a Track,
    window: Window,
    armed: bool,
}

impl<'a> LoadClaim<'a> {
    fn new(track: &'a Track, window: Window) -> Self {
        Self {
            track,
            window,
            armed: true,
        }
    }

    pub(crate) fn track(&self) -> &'a Track {
        self.track
    }

    pub(crate) fn window(&self) -> Window {
        self.window
    }

    pub(crate) fn install(mut self, chunk: Chunk) -> Arc<Chunk> {
        let chunk = Arc::new(chunk);
        {
            let mut slots = self.track.slots.lock();
            slots
                .windows
                .insert(self.window.start, Slot::Resident(chunk.clone()));
            slots.generation += 1;
        }
        self.armed = false;
        self.track.loaded.notify_all();
        self.track.observe(&chunk);
        self.track.remember(&chunk);
        debug!(
            track = self.track.id,
            window = self.window.start,
            records = chunk.record_count(),
            "chunk resident"
        );
        chunk
    }
}

impl Drop for LoadClaim<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.track.slots.lock();
        if matches!(slots.windows.get(&self.window.start), Some(Slot::Loading)) {
            slots.windows.remove(&self.window.start);
        }
        drop(slots);
        self.track.loaded.notify_all();
    }
}
