//! meshroute Call Tracking
//!
//! This crate records the outcome of every call a client makes to a host and
//! rolls those records up into per-interval statistics. The degrader reads
//! one [`CallStats`] per host per update interval and turns it into a weight.
//!
//! # Architecture
//!
//! - [`CallTracker`]: lock-free per-host recorder with interval rollover
//! - [`CallCompletion`]: guard returned by [`CallTracker::start_call`]
//! - [`CallStats`]: serializable summary of one interval
//! - [`CallStatsSource`]: seam between the recorder and its consumer
//!
//! # Latency
//!
//! Latencies are kept in a log-linear histogram. Averages are exact;
//! percentiles are interpolated within a bin and never exceed the slowest
//! sample of the interval.
//!
//! # Usage Example
//!
//! ```rust
//! use meshroute_metrics::{CallStatsSource, CallTracker, ErrorType};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let tracker = Arc::new(CallTracker::new());
//!
//! let call = tracker.start_call();
//! // ... perform the request ...
//! call.end_call();
//!
//! tracker.track_call_with_error(Duration::from_millis(800), ErrorType::Timeout);
//!
//! let stats = tracker.rollover().unwrap();
//! assert_eq!(stats.call_count, 2);
//! assert_eq!(stats.error_rate(), 0.5);
//! ```

mod histogram;
mod stats;
mod tracker;

pub use stats::{CallStats, ErrorType, LatencySummary};
pub use tracker::{CallCompletion, CallStatsError, CallStatsSource, CallTracker};
