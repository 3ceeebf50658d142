// Copyright 2025 meshroute Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::histogram::LatencyHistogram;
use crate::stats::{CallStats, ErrorType};

const ERROR_TYPES: [ErrorType; 5] = [
    ErrorType::Connect,
    ErrorType::ClosedChannel,
    ErrorType::ServerError,
    ErrorType::Timeout,
    ErrorType::Other,
];

fn error_index(error: ErrorType) -> usize {
    match error {
        ErrorType::Connect => 0,
        ErrorType::ClosedChannel => 1,
        ErrorType::ServerError => 2,
        ErrorType::Timeout => 3,
        ErrorType::Other => 4,
    }
}

/// Failure to produce interval statistics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallStatsError {
    #[error("call tracker is closed")]
    Closed,

    #[error("call statistics unavailable: {0}")]
    Unavailable(String),
}

/// Anything that can hand out per-interval call statistics.
///
/// Rolling over closes the current interval and starts a new one.
pub trait CallStatsSource: Send + Sync {
    fn rollover(&self) -> Result<CallStats, CallStatsError>;
}

/// Tracks calls made to one host.
///
/// Recording is lock-free; only interval rollover takes a lock, and only to
/// swap the interval start time.
#[derive(Debug)]
pub struct CallTracker {
    latencies: LatencyHistogram,
    call_count: AtomicU64,
    error_counts: [AtomicU64; ERROR_TYPES.len()],
    outstanding: AtomicI64,
    total_call_count: AtomicU64,
    interval_start: Mutex<Instant>,
    closed: AtomicBool,
}

impl CallTracker {
    pub fn new() -> Self {
        Self {
            latencies: LatencyHistogram::new(),
            call_count: AtomicU64::new(0),
            error_counts: std::array::from_fn(|_| AtomicU64::new(0)),
            outstanding: AtomicI64::new(0),
            total_call_count: AtomicU64::new(0),
            interval_start: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        }
    }

    /// Starts timing a call. The returned guard records it when ended.
    pub fn start_call(self: &Arc<Self>) -> CallCompletion {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        CallCompletion {
            tracker: Arc::clone(self),
            started: Instant::now(),
        }
    }

    /// Records a successful call that took `duration`.
    pub fn track_call(&self, duration: Duration) {
        self.record(duration, None);
    }

    /// Records a failed call that took `duration`.
    pub fn track_call_with_error(&self, duration: Duration, error: ErrorType) {
        self.record(duration, Some(error));
    }

    /// Calls recorded since the tracker was created.
    pub fn total_call_count(&self) -> u64 {
        self.total_call_count.load(Ordering::Relaxed)
    }

    /// Stops producing statistics. Calls may still be recorded.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn record(&self, duration: Duration, error: Option<ErrorType>) {
        let latency_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.latencies.record(latency_us);
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_call_count.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = error {
            self.error_counts[error_index(error)].fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for CallTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStatsSource for CallTracker {
    fn rollover(&self) -> Result<CallStats, CallStatsError> {
        if self.is_closed() {
            return Err(CallStatsError::Closed);
        }

        let interval = {
            let mut start = self.interval_start.lock();
            let now = Instant::now();
            let elapsed = now.duration_since(*start);
            *start = now;
            elapsed
        };

        let error_counts: HashMap<ErrorType, u64> = ERROR_TYPES
            .iter()
            .map(|&kind| (kind, self.error_counts[error_index(kind)].swap(0, Ordering::Relaxed)))
            .filter(|(_, count)| *count > 0)
            .collect();

        Ok(CallStats {
            interval,
            call_count: self.call_count.swap(0, Ordering::Relaxed),
            error_counts,
            latency: self.latencies.drain(),
            outstanding_count: self.outstanding.load(Ordering::Relaxed).max(0) as u64,
        })
    }
}

/// In-flight call started by [`CallTracker::start_call`].
///
/// Dropping the guard without ending it abandons the call: it stops counting
/// as outstanding but is not recorded.
#[derive(Debug)]
pub struct CallCompletion {
    tracker: Arc<CallTracker>,
    started: Instant,
}

impl CallCompletion {
    pub fn end_call(self) {
        self.tracker.track_call(self.started.elapsed());
    }

    pub fn end_call_with_error(self, error: ErrorType) {
        self.tracker
            .track_call_with_error(self.started.elapsed(), error);
    }
}

impl Drop for CallCompletion {
    fn drop(&mut self) {
        self.tracker.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}
