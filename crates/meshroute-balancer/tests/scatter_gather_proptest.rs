//! Scatter/Gather Property Tests
//!
//! For any batch of distinct keys, `UriMapper::map_uris` must place every
//! key in exactly one host group or exactly one unmapped group, whether
//! routing is sticky or not and whatever mix of resolvable, hostless and
//! unresolvable keys the batch holds.

use std::collections::HashSet;
use std::sync::OnceLock;

use http::Uri;
use meshroute_balancer::{LoadBalancerState, UriKeyPair, UriMapper, UriMappingResult, PARTITION_NOT_FOUND};
use meshroute_common::keys;
use meshroute_common::{
    ClusterProperties, PartitionProperties, PropertyEvent, PropertyValue, RangePartition,
    ServiceProperties, UriProperties,
};
use proptest::prelude::*;
use tokio::runtime::Runtime;

const CLUSTER: &str = "articles-cluster";

struct Fixture {
    runtime: Runtime,
    plain: UriMapper,
    sticky: UriMapper,
}

fn uri(s: &str) -> Uri {
    s.parse().unwrap()
}

/// Ids 0..16 fall in four partitions of four; partition 3 has no hosts and
/// ids from 16 have no partition.
fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();

        let (plain, sticky) = runtime.block_on(async {
            let (state, sender) = LoadBalancerState::builder().spawn().unwrap();
            let cluster = ClusterProperties::new(CLUSTER).with_partition(PartitionProperties::Range(
                RangePartition {
                    key_regex: r"id=(\d+)".to_string(),
                    key_range_start: 0,
                    partition_size: 4,
                    partition_count: 4,
                },
            ));
            let uris = UriProperties::new(CLUSTER)
                .with_partitions(uri("http://foo1:8080/articles"), [(0, 1.0)])
                .with_partitions(uri("http://foo2:8080/articles"), [(0, 1.0), (1, 1.0)])
                .with_partitions(uri("http://foo3:8080/articles"), [(1, 1.0), (2, 1.0)])
                .with_partitions(uri("http://foo4:8080/articles"), [(2, 1.0)]);
            let sticky = ServiceProperties::new("sticky-articles", CLUSTER)
                .with_strategy_property(keys::HASH_METHOD, keys::HASH_METHOD_URI_REGEX)
                .with_strategy_property(keys::HASH_CONFIG_REGEXES, r"id=(\d+)");

            for value in [
                PropertyValue::Cluster(cluster),
                PropertyValue::Uri(uris),
                PropertyValue::Service(ServiceProperties::new("articles", CLUSTER)),
                PropertyValue::Service(sticky),
            ] {
                sender.send(PropertyEvent::add(value)).await.unwrap();
            }
            sender.flush().await.unwrap();
            // The state outlives the sender; ingestion just stops.
            (UriMapper::new(state.clone()), UriMapper::new(state))
        });

        Fixture { runtime, plain, sticky }
    })
}

fn pairs(service: &str, ids: &HashSet<u32>) -> Vec<UriKeyPair<u32>> {
    ids.iter()
        .map(|&id| UriKeyPair::new(uri(&format!("d2://{}/items?id={}", service, id)), id))
        .collect()
}

fn assert_mece(ids: &HashSet<u32>, result: &UriMappingResult<u32>) {
    let mut seen = HashSet::new();
    for key in result.mapped.values().chain(result.unmapped.values()).flatten() {
        assert!(seen.insert(*key), "key {} placed twice", key);
    }
    assert_eq!(&seen, ids);
    assert_eq!(result.mapped_key_count() + result.unmapped_key_count(), ids.len());
}

proptest! {
    #[test]
    fn prop_map_uris_places_every_key_once(
        ids in prop::collection::hash_set(0u32..24, 1..40),
        sticky in any::<bool>(),
    ) {
        let fixture = fixture();
        let _guard = fixture.runtime.enter();
        let (mapper, service) = if sticky {
            (&fixture.sticky, "sticky-articles")
        } else {
            (&fixture.plain, "articles")
        };

        let result = mapper.map_uris(pairs(service, &ids)).unwrap();
        assert_mece(&ids, &result);

        for (partition, keys) in &result.unmapped {
            for key in keys {
                match *partition {
                    PARTITION_NOT_FOUND => prop_assert!(*key >= 16),
                    3 => prop_assert!((12..16).contains(key)),
                    other => prop_assert!(false, "partition {} has hosts", other),
                }
            }
        }
    }

    #[test]
    fn prop_sticky_mapping_is_repeatable(ids in prop::collection::hash_set(0u32..12, 1..20)) {
        let fixture = fixture();
        let _guard = fixture.runtime.enter();

        let first = fixture.sticky.map_uris(pairs("sticky-articles", &ids)).unwrap();
        let second = fixture.sticky.map_uris(pairs("sticky-articles", &ids)).unwrap();
        prop_assert_eq!(first.mapped, second.mapped);
    }
}
