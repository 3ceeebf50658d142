//! Health-adaptive host weighting.
//!
//! A [`DegraderController`] turns interval call statistics into a weight
//! multiplier; the [`DegraderScheduler`] ticks one controller per host on the
//! tokio runtime. Weights reach routing only through ring rebuilds. A
//! [`ClusterDropController`] sheds calls service-wide when every host is
//! slow.

mod cluster;
mod config;
mod controller;
mod scheduler;

pub use cluster::{ClusterDropController, ClusterWindow};
pub use config::{DegraderConfig, DegraderSettings, LatencyToUse};
pub use controller::{DegraderController, DegraderPhase, WeightChange};
pub use scheduler::DegraderScheduler;
