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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The connection could not be established.
    Connect,
    /// The channel closed before a response arrived.
    ClosedChannel,
    /// The server answered with a server-side failure.
    ServerError,
    Timeout,
    /// Any other failure; not held against the host's health.
    Other,
}

impl ErrorType {
    /// Whether this failure counts toward the degrader's error rate.
    pub fn affects_health(self) -> bool {
        !matches!(self, ErrorType::Other)
    }
}

/// Latency statistics of one interval, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub average_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Statistics of one completed tracking interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStats {
    pub interval: Duration,
    pub call_count: u64,
    /// Failed calls by category.
    pub error_counts: HashMap<ErrorType, u64>,
    pub latency: LatencySummary,
    /// Calls started in the interval that had not completed when it closed.
    pub outstanding_count: u64,
}

impl CallStats {
    /// Total failed calls of any category.
    pub fn error_count(&self) -> u64 {
        self.error_counts.values().sum()
    }

    /// Fraction of calls that failed in a way attributable to the host.
    pub fn error_rate(&self) -> f64 {
        if self.call_count == 0 {
            return 0.0;
        }
        let health_errors: u64 = self
            .error_counts
            .iter()
            .filter(|(kind, _)| kind.affects_health())
            .map(|(_, count)| count)
            .sum();
        health_errors as f64 / self.call_count as f64
    }

    pub fn calls_per_second(&self) -> f64 {
        let secs = self.interval.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.call_count as f64 / secs
    }
}
