use std::sync::Arc;

use super::config::StrategyConfig;
use super::rings::RingSlots;
use crate::hashing::{points_for_weight, HashRing, RequestHash};
use crate::state::ClusterGeneration;

/// Weighted random selection with no health feedback.
///
/// Rings carry only the announced weights and every request starts from a
/// random point, so a configured hash method is ignored.
#[derive(Debug)]
pub struct RandomStrategy {
    service: String,
    scheme: Option<String>,
    config: StrategyConfig,
    request_hash: RequestHash,
    rings: RingSlots,
}

impl RandomStrategy {
    /// `scheme` limits the hosts to one URI scheme; `None` accepts any.
    pub fn new(service: impl Into<String>, scheme: Option<String>, config: StrategyConfig) -> Self {
        let rings = RingSlots::new(config.hashring_point_cleanup_rate);
        Self {
            service: service.into(),
            scheme,
            config,
            request_hash: RequestHash::Random,
            rings,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn request_hash(&self) -> &RequestHash {
        &self.request_hash
    }

    pub fn ring(&self, generation: &ClusterGeneration, partition: i32) -> Arc<HashRing> {
        self.rings.ring(generation.version, 0, partition, |_| {
            generation
                .hosts_for_partition(partition, self.scheme.as_deref())
                .into_iter()
                .map(|(host, weight)| (host.clone(), points_for_weight(weight, self.config.points_per_weight)))
                .collect()
        })
    }

    pub fn retain(&self, generation: &ClusterGeneration) {
        let max_partition_id = generation.max_partition_id();
        self.rings
            .retain_partitions(|partition| partition <= max_partition_id);
    }

    pub fn shutdown(&self) {
        self.rings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionAccessor;
    use http::Uri;
    use meshroute_common::properties::{ClusterProperties, UriProperties, VersionedProperty};

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_ring_ignores_scheme_when_unrestricted() {
        let generation = ClusterGeneration {
            version: 1,
            cluster: VersionedProperty::new(ClusterProperties::new("members")),
            uris: Some(VersionedProperty::new(
                UriProperties::new("members")
                    .with_host(uri("http://a:1"), 1.0)
                    .with_host(uri("https://b:1"), 2.0),
            )),
            accessor: VersionedProperty::new(PartitionAccessor::Default),
        };

        let strategy = RandomStrategy::new("members", None, StrategyConfig::default());
        let ring = strategy.ring(&generation, 0);
        assert_eq!(ring.point_count(&uri("http://a:1")), 100);
        assert_eq!(ring.point_count(&uri("https://b:1")), 200);
        assert!(!strategy.request_hash().is_sticky());
    }
}
