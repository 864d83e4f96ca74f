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

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub enum FutureState {
    /// Not yet handed to a fetch.
    #[default]
    Idle,
    Pending,
    Completed(Result<()>),
    Cancelled,
}

#[derive(Default)]
struct Shared {
    state: Mutex<FutureState>,
    changed: Condvar,
}

/// Completion signal of one asynchronous fetch. A future is single-use: once
/// armed by a fetch it cannot be handed to another one.
#[derive(Clone, Default)]
pub struct Future {
    shared: Arc<Shared>,
}

impl Future {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FutureState {
        self.shared.state.lock().clone()
    }

    pub(crate) fn arm(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if *state != FutureState::Idle {
            return Err(Error::invalid("future was already used"));
        }
        *state = FutureState::Pending;
        Ok(())
    }

    pub(crate) fn complete(&self, result: Result<()>) {
        let mut state = self.shared.state.lock();
        if *state == FutureState::Pending {
            *state = FutureState::Completed(result);
            self.shared.changed.notify_all();
        }
    }

    /// Cancels a pending fetch. Returns false when the fetch has already
    /// completed or was never started.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state.lock();
        if *state != FutureState::Pending {
            return false;
        }
        *state = FutureState::Cancelled;
        self.shared.changed.notify_all();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shared.state.lock() == FutureState::Cancelled
    }

    pub fn is_done(&self) -> bool {
        matches!(
            *self.shared.state.lock(),
            FutureState::Completed(_) | FutureState::Cancelled
        )
    }

    /// Blocks until the fetch finishes or `timeout` elapses, returning the
    /// fetch's result. Waits forever when `timeout` is `None`.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        loop {
            match &*state {
                FutureState::Completed(result) => return result.clone(),
                FutureState::Cancelled => return Err(Error::Cancelled),
                FutureState::Idle => return Err(Error::invalid("future was never armed")),
                FutureState::Pending => {}
            }
            match deadline {
                Some(deadline) => {
                    let waited = self.shared.changed.wait_until(&mut state, deadline);
                    if waited.timed_out() && *state == FutureState::Pending {
                        return Err(Error::Timeout);
                    }
                }
                None => self.shared.changed.wait(&mut state),
            }
        }
    }
}
