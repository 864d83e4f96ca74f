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

//! Per-track index from event id to the far end of its flow.

use std::collections::BTreeMap;
use std::mem::size_of;
use std::sync::Arc;

use protocol::TrackKind;
use tracing::{debug, warn};

use crate::chunk::Chunk;

/// Extra information attached to a flow endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointInfo {
    /// Timestamp of the last execution reached by this launch. Graph launches
    /// fan out to several executions on one queue.
    LastTimestamp(u64),
    /// Id of the launch event on the CPU side.
    CorrelationId(u64),
}

impl EndpointInfo {
    pub fn value(&self) -> u64 {
        match *self {
            EndpointInfo::LastTimestamp(ts) => ts,
            EndpointInfo::CorrelationId(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEndpoint {
    track_id: u32,
    timestamp: u64,
    info: EndpointInfo,
}

impl FlowEndpoint {
    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn info(&self) -> EndpointInfo {
        self.info
    }
}

#[derive(Debug, Default)]
pub(crate) struct FlowIndex {
    entries: BTreeMap<u64, FlowEndpoint>,
    built_for: Option<u64>,
}

impl FlowIndex {
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.built_for == Some(generation)
    }

    pub(crate) fn invalidate(&mut self) {
        self.built_for = None;
    }

    pub(crate) fn rebuild<F>(&mut self, generation: u64, chunks: &[Arc<Chunk>], kind_of: F)
    where
        F: Fn(u32) -> Option<TrackKind>,
    {
        self.entries.clear();
        for chunk in chunks {
            for flow in chunk.flows() {
                let Some(target_kind) = kind_of(flow.target_track) else {
                    warn!(
                        track = chunk.track_id(),
                        target = flow.target_track,
                        "flow points at unknown track"
                    );
                    continue;
                };
                let is_execution = target_kind == TrackKind::KernelExecute;

                if let Some(existing) = self.entries.get_mut(&flow.source_id) {
                    if !is_execution {
                        debug!(event = flow.source_id, "duplicate flow ignored");
                    } else if existing.track_id != flow.target_track {
                        warn!(
                            event = flow.source_id,
                            first = existing.track_id,
                            other = flow.target_track,
                            "graph launch reaches several tracks, keeping the first"
                        );
                    } else if let EndpointInfo::LastTimestamp(last) = existing.info {
                        existing.info =
                            EndpointInfo::LastTimestamp(last.max(flow.target_timestamp));
                    }
                    continue;
                }

                let info = if is_execution {
                    EndpointInfo::LastTimestamp(flow.target_timestamp)
                } else {
                    EndpointInfo::CorrelationId(flow.target_id)
                };
                self.entries.insert(
                    flow.source_id,
                    FlowEndpoint {
                        track_id: flow.target_track,
                        timestamp: flow.target_timestamp,
                        info,
                    },
                );
            }
        }
        self.built_for = Some(generation);
    }

    pub(crate) fn get(&self, event_id: u64) -> Option<FlowEndpoint> {
        self.entries.get(&event_id).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn memory_footprint(&self) -> usize {
        size_of::<Self>() + self.entries.len() * (size_of::<u64>() + size_of::<FlowEndpoint>())
    }
}
