use std::collections::HashMap;
use std::sync::Arc;

use http::Uri;
use meshroute_common::error::Result;
use meshroute_metrics::CallTracker;
use tokio::runtime::Handle;

use super::config::StrategyConfig;
use super::rings::RingSlots;
use crate::degrader::{DegraderConfig, DegraderScheduler, DegraderSettings};
use crate::hashing::{points_for_weight, HashRing, RequestHash};
use crate::state::ClusterGeneration;

/// Consistent-hash strategy whose host weights follow observed health.
///
/// A host's ring share is its announced weight times the multiplier its
/// degrader controller currently holds. Rings are rebuilt lazily, on the
/// first lookup after either the cluster generation or a multiplier changed.
pub struct DegraderStrategy {
    service: String,
    scheme: String,
    config: StrategyConfig,
    request_hash: RequestHash,
    scheduler: DegraderScheduler,
    rings: RingSlots,
}

impl DegraderStrategy {
    pub fn new(
        service: impl Into<String>,
        scheme: impl Into<String>,
        config: StrategyConfig,
        degrader: &DegraderConfig,
        runtime: Handle,
    ) -> Result<Self> {
        let service = service.into();
        let request_hash = config.hash_method.request_hash()?;
        let settings = DegraderSettings::resolve(&config, degrader);
        let scheduler = DegraderScheduler::new(service.clone(), runtime, config.update_interval, settings);
        let rings = RingSlots::new(config.hashring_point_cleanup_rate);

        Ok(Self {
            service,
            scheme: scheme.into(),
            config,
            request_hash,
            scheduler,
            rings,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn request_hash(&self) -> &RequestHash {
        &self.request_hash
    }

    pub fn scheduler(&self) -> &DegraderScheduler {
        &self.scheduler
    }

    /// Ring for `partition` as of `generation`, with current degrader weights.
    pub fn ring(&self, generation: &ClusterGeneration, partition: i32) -> Arc<HashRing> {
        let epoch = self.scheduler.epoch();
        self.rings.ring(generation.version, epoch, partition, |build| {
            let mut points = HashMap::new();
            for (host, weight) in generation.hosts_for_partition(partition, Some(&self.scheme)) {
                let multiplier = if build.publish {
                    // Hosts joining a partition that already serves traffic
                    // slow-start instead of taking a full share at once.
                    let joining = build
                        .previous
                        .map(|previous| !previous.points.contains_key(host))
                        .unwrap_or(false);
                    self.scheduler.track(host, joining)
                } else {
                    self.scheduler.multiplier(host).unwrap_or(1.0)
                };
                points.insert(host.clone(), points_for_weight(weight * multiplier, self.config.points_per_weight));
            }
            points
        })
    }

    pub fn tracker(&self, host: &Uri) -> Option<Arc<CallTracker>> {
        self.scheduler.tracker(host)
    }

    /// Applies new degrader thresholds without resetting host state.
    pub fn reconfigure(&self, degrader: &DegraderConfig) {
        self.scheduler
            .update_settings(DegraderSettings::resolve(&self.config, degrader));
    }

    /// Reaps the state of hosts and partitions that left the cluster.
    pub fn retain(&self, generation: &ClusterGeneration) {
        let max_partition_id = generation.max_partition_id();
        self.rings
            .retain_partitions(|partition| partition <= max_partition_id);
        self.scheduler
            .retain(|host| generation.contains_host(host));
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.rings.clear();
    }
}

impl std::fmt::Debug for DegraderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegraderStrategy")
            .field("service", &self.service)
            .field("scheme", &self.scheme)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
