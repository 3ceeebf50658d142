//! Fixtures shared by unit tests.

use http::Uri;
use meshroute_common::event::{PropertyEvent, PropertyValue};
use meshroute_common::properties::{
    ClusterProperties, PartitionProperties, RangePartition, ServiceProperties, UriProperties,
};

use crate::state::LoadBalancerState;

pub(crate) fn uri(s: &str) -> Uri {
    s.parse().unwrap()
}

/// Numeric keys split into `count` ranges of `size`, starting at 0.
pub(crate) fn range_cluster(name: &str, size: i64, count: i32) -> ClusterProperties {
    ClusterProperties::new(name).with_partition(PartitionProperties::Range(RangePartition {
        key_regex: r"(\d+)".to_string(),
        key_range_start: 0,
        partition_size: size,
        partition_count: count,
    }))
}

/// A running state holding exactly the given properties.
pub(crate) async fn state_with(
    cluster: ClusterProperties,
    uris: UriProperties,
    service: ServiceProperties,
) -> LoadBalancerState {
    let (state, sender) = LoadBalancerState::builder().spawn().unwrap();
    for value in [
        PropertyValue::Cluster(cluster),
        PropertyValue::Uri(uris),
        PropertyValue::Service(service),
    ] {
        sender.send(PropertyEvent::add(value)).await.unwrap();
    }
    sender.flush().await.unwrap();
    state
}

/// Range-partitioned `articles` service: partitions of 4 keys, four
/// partitions, partition 3 without hosts.
pub(crate) async fn articles_state(service: ServiceProperties) -> LoadBalancerState {
    let uris = UriProperties::new("articles-cluster")
        .with_partitions(uri("http://foo1:8080/articles"), [(0, 1.0)])
        .with_partitions(uri("http://foo2:8080/articles"), [(0, 1.0), (1, 1.0)])
        .with_partitions(uri("http://foo3:8080/articles"), [(1, 1.0)])
        .with_partitions(uri("http://foo4:8080/articles"), [(2, 1.0)]);
    state_with(range_cluster("articles-cluster", 4, 4), uris, service).await
}

pub(crate) fn articles_service() -> ServiceProperties {
    ServiceProperties::new("articles", "articles-cluster")
}
