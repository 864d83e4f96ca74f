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

//! Storage backends feeding the engine.
//!
//! A [`Database`] answers two questions: what does the trace look like
//! ([`Database::read_trace_properties`]) and what records fall into a window
//! for a set of tracks ([`Database::read_chunk_per_track`]). Reads are handed
//! back as a [`ReadSession`], which performs one step of work per call to
//! `next()` and reports progress, so a caller can show progress or abandon
//! a read halfway.

use std::collections::VecDeque;
use std::iter::FusedIterator;

use protocol::{ChunkData, TraceProperties};

use crate::{Error, Result};

mod archive;
mod memory;

pub use archive::{write_archive, ArchiveDatabase};
pub use memory::{MemoryDatabase, ReadStats};

pub trait Database: Send {
    fn read_trace_properties(&mut self) -> Result<ReadSession<TraceProperties>>;

    /// Sets the half-open window `[start, end)` of the next chunk read.
    fn configure_read_window(&mut self, start: u64, end: u64);

    fn add_track_to_read_config(&mut self, track: u32);

    fn reset_read_config(&mut self);

    /// Reads the configured window, one step per track.
    fn read_chunk_per_track(&mut self) -> Result<ReadSession<Vec<ChunkData>>>;

    /// Reads the configured window for all configured tracks in a single step.
    fn read_chunk_all_tracks(&mut self) -> Result<ReadSession<Vec<ChunkData>>>;

    fn close(&mut self) {}
}

/// Window and track selection accumulated before a chunk read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadConfig {
    pub start: u64,
    pub end: u64,
    pub tracks: Vec<u32>,
}

impl ReadConfig {
    pub fn check(&self) -> Result<()> {
        if self.end <= self.start {
            return Err(Error::invalid("read window is empty"));
        }
        if self.tracks.is_empty() {
            return Err(Error::invalid("no tracks configured for read"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub percent: u8,
    pub message: String,
}

type Step<T> = Box<dyn FnOnce(&mut T) -> Result<()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Running,
    Failed,
    Cancelled,
}

/// A database read in progress. Iterating runs one step at a time; dropping
/// or cancelling the session abandons the remaining steps.
pub struct ReadSession<T> {
    output: T,
    steps: VecDeque<(String, Step<T>)>,
    total: usize,
    state: SessionState,
    failure: Option<Error>,
}

impl<T> ReadSession<T> {
    pub fn new(output: T) -> Self {
        Self {
            output,
            steps: VecDeque::new(),
            total: 0,
            state: SessionState::Running,
            failure: None,
        }
    }

    pub fn step<F>(mut self, message: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(&mut T) -> Result<()> + Send + 'static,
    {
        self.steps.push_back((message.into(), Box::new(f)));
        self.total += 1;
        self
    }

    pub fn cancel(&mut self) {
        if self.state == SessionState::Running {
            self.state = SessionState::Cancelled;
            self.steps.clear();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == SessionState::Cancelled
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }

    /// Runs the remaining steps and yields the result.
    pub fn finish(mut self) -> Result<T> {
        for progress in self.by_ref() {
            progress?;
        }
        match self.state {
            SessionState::Running => Ok(self.output),
            SessionState::Cancelled => Err(Error::Cancelled),
            SessionState::Failed => Err(self.failure.unwrap_or(Error::Cancelled)),
        }
    }
}

impl<T> Iterator for ReadSession<T> {
    type Item = Result<Progress>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != SessionState::Running {
            return None;
        }
        let (message, step) = self.steps.pop_front()?;
        if let Err(e) = step(&mut self.output) {
            self.state = SessionState::Failed;
            self.steps.clear();
            self.failure = Some(e.clone());
            return Some(Err(e));
        }
        let done = self.total - self.steps.len();
        let percent = (done * 100 / self.total.max(1)) as u8;
        Some(Ok(Progress { percent, message }))
    }
}

impl<T> FusedIterator for ReadSession<T> {}
