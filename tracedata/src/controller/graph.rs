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

use crate::array::GraphPoint;
use crate::trace::RangeRecords;

/// Equal-width bins over the inclusive range `[start, end]`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bins {
    start: u64,
    span: u128,
    count: u128,
}

impl Bins {
    pub(crate) fn new(start: u64, end: u64, count: u32) -> Self {
        Self {
            start,
            span: (end - start) as u128 + 1,
            count: count.max(1) as u128,
        }
    }

    pub(crate) fn of(&self, ts: u64) -> usize {
        ((ts - self.start) as u128 * self.count / self.span) as usize
    }
}

#[derive(Default)]
struct Accumulator {
    children: u64,
    first_ts: u64,
    sum_ts: u128,
    sum: f64,
    min: f64,
    max: f64,
    longest: u64,
}

impl Accumulator {
    fn add(&mut self, ts: u64, value: f64) {
        if self.children == 0 {
            self.first_ts = ts;
            self.min = value;
            self.max = value;
        }
        self.children += 1;
        self.sum_ts += ts as u128;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn sample_point(&self, track: u32) -> GraphPoint {
        let n = self.children.max(1);
        GraphPoint {
            track,
            timestamp: (self.sum_ts / n as u128) as u64,
            value: self.sum / n as f64,
            duration: 0,
            children: self.children,
            min: self.min,
            max: self.max,
        }
    }

    fn event_point(&self, track: u32) -> GraphPoint {
        GraphPoint {
            track,
            timestamp: self.first_ts,
            value: self.longest as f64,
            duration: self.longest,
            children: self.children,
            min: self.min,
            max: self.max,
        }
    }
}

/// Reduces `records` to at most `count` points, one per non-empty bin.
/// Samples collapse to their mean; events to the earliest start and the
/// longest duration. Events starting before `start` are not drawn.
pub(crate) fn downsample(
    track: u32,
    records: &RangeRecords,
    start: u64,
    end: u64,
    count: u32,
) -> Vec<GraphPoint> {
    let bins = Bins::new(start, end, count);
    let mut points = Vec::new();
    let mut current: Option<(usize, Accumulator)> = None;

    let mut feed = |ts: u64, value: f64, duration: u64, points: &mut Vec<GraphPoint>| {
        let bin = bins.of(ts);
        if !matches!(&current, Some((b, _)) if *b == bin) {
            if let Some((_, done)) = current.take() {
                points.push(finish(track, records, &done));
            }
            current = Some((bin, Accumulator::default()));
        }
        if let Some((_, acc)) = &mut current {
            acc.add(ts, value);
            acc.longest = acc.longest.max(duration);
        }
    };

    match records {
        RangeRecords::Metrics(samples) => {
            for s in samples.iter().filter(|s| s.timestamp >= start && s.timestamp <= end) {
                feed(s.timestamp, s.value, 0, &mut points);
            }
        }
        RangeRecords::Events(events) => {
            for e in events.iter().filter(|e| e.start >= start && e.start <= end) {
                feed(e.start, e.duration as f64, e.duration, &mut points);
            }
        }
    }
    if let Some((_, done)) = current {
        points.push(finish(track, records, &done));
    }
    points
}

fn finish(track: u32, records: &RangeRecords, acc: &Accumulator) -> GraphPoint {
    match records {
        RangeRecords::Metrics(_) => acc.sample_point(track),
        RangeRecords::Events(_) => acc.event_point(track),
    }
}
