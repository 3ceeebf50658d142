//! Load balancer strategies.
//!
//! A strategy owns the rings of one (service, scheme) pair and decides how
//! requests pick a starting point on them.

mod config;
mod degrader;
mod random;
mod registry;
mod rings;

use std::sync::Arc;

use http::Uri;
use meshroute_metrics::CallTracker;

pub use config::{HashMethod, StrategyConfig};
pub use degrader::DegraderStrategy;
pub use random::RandomStrategy;
pub use registry::{StrategyKind, StrategyRegistry};

use crate::degrader::DegraderConfig;
use crate::hashing::{HashRing, RequestHash};
use crate::state::ClusterGeneration;

/// The implementation behind a [`LoadBalancerStrategy`].
#[derive(Debug)]
pub enum StrategyImpl {
    Degrader(DegraderStrategy),
    Random(RandomStrategy),
}

/// A named strategy instance built for one (service, scheme) pair.
#[derive(Debug)]
pub struct LoadBalancerStrategy {
    name: String,
    imp: StrategyImpl,
}

impl LoadBalancerStrategy {
    pub fn new(name: impl Into<String>, imp: StrategyImpl) -> Self {
        Self {
            name: name.into(),
            imp,
        }
    }

    /// Name the service configuration selected this strategy by.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StrategyKind {
        match &self.imp {
            StrategyImpl::Degrader(_) => StrategyKind::Degrader,
            StrategyImpl::Random(_) => StrategyKind::Random,
        }
    }

    pub fn implementation(&self) -> &StrategyImpl {
        &self.imp
    }

    pub fn config(&self) -> &StrategyConfig {
        match &self.imp {
            StrategyImpl::Degrader(s) => s.config(),
            StrategyImpl::Random(s) => s.config(),
        }
    }

    pub fn request_hash(&self) -> &RequestHash {
        match &self.imp {
            StrategyImpl::Degrader(s) => s.request_hash(),
            StrategyImpl::Random(s) => s.request_hash(),
        }
    }

    /// Whether equal request URIs always land on the same host.
    pub fn is_sticky(&self) -> bool {
        self.request_hash().is_sticky()
    }

    /// Ring of `partition` built from `generation`.
    pub fn ring(&self, generation: &ClusterGeneration, partition: i32) -> Arc<HashRing> {
        match &self.imp {
            StrategyImpl::Degrader(s) => s.ring(generation, partition),
            StrategyImpl::Random(s) => s.ring(generation, partition),
        }
    }

    /// Call tracker of `host`, when the strategy observes call outcomes.
    pub fn tracker(&self, host: &Uri) -> Option<Arc<CallTracker>> {
        match &self.imp {
            StrategyImpl::Degrader(s) => s.tracker(host),
            StrategyImpl::Random(_) => None,
        }
    }

    /// Draws whether to shed one call at the service's cluster drop rate.
    pub fn should_drop_call(&self) -> bool {
        match &self.imp {
            StrategyImpl::Degrader(s) => s.scheduler().should_drop(),
            StrategyImpl::Random(_) => false,
        }
    }

    /// Whether this instance can absorb a service update in place: the same
    /// implementation and unchanged strategy configuration.
    pub fn is_compatible(&self, kind: StrategyKind, config: &StrategyConfig) -> bool {
        self.kind() == kind && self.config() == config
    }

    pub fn reconfigure(&self, degrader: &DegraderConfig) {
        if let StrategyImpl::Degrader(s) = &self.imp {
            s.reconfigure(degrader);
        }
    }

    /// Drops per-host and per-partition state no longer in `generation`.
    pub fn retain(&self, generation: &ClusterGeneration) {
        match &self.imp {
            StrategyImpl::Degrader(s) => s.retain(generation),
            StrategyImpl::Random(s) => s.retain(generation),
        }
    }

    pub fn shutdown(&self) {
        match &self.imp {
            StrategyImpl::Degrader(s) => s.shutdown(),
            StrategyImpl::Random(s) => s.shutdown(),
        }
    }
}
