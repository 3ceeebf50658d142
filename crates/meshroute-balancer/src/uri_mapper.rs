//! Scatter/gather grouping of request URIs by destination host.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use http::Uri;
use meshroute_common::error::{Result, RouteError};
use meshroute_common::keys::DEFAULT_PARTITION_ID;
use meshroute_common::uri::service_name;
use tracing::{debug, trace};

use crate::hashing::random_hash;
use crate::key_mapper::RingCache;
use crate::state::{LoadBalancerState, ServiceRoute};

/// Partition id under which keys whose request URI has no partition are
/// reported.
pub const PARTITION_NOT_FOUND: i32 = -1;

/// One request of a batch: its URI and the resource key it fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriKeyPair<K> {
    request_uri: Uri,
    key: Option<K>,
    partition_ids: Option<BTreeSet<i32>>,
}

impl<K> UriKeyPair<K> {
    pub fn new(request_uri: Uri, key: K) -> Self {
        Self {
            request_uri,
            key: Some(key),
            partition_ids: None,
        }
    }

    /// A keyless request sent once to each of `partition_ids`, bypassing
    /// partition resolution. At most one such pair may appear in a batch.
    pub fn with_partition_ids(request_uri: Uri, partition_ids: impl IntoIterator<Item = i32>) -> Self {
        Self {
            request_uri,
            key: None,
            partition_ids: Some(partition_ids.into_iter().collect()),
        }
    }

    pub fn request_uri(&self) -> &Uri {
        &self.request_uri
    }

    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    pub fn partition_ids(&self) -> Option<&BTreeSet<i32>> {
        self.partition_ids.as_ref()
    }
}

/// Output of [`UriMapper::map_uris`].
///
/// Every input key lands in exactly one host set or in exactly one
/// unmapped set. Hosts reached only through keyless requests map to an
/// empty set.
#[derive(Debug, Clone, PartialEq)]
pub struct UriMappingResult<K: Eq + Hash> {
    pub mapped: HashMap<Uri, HashSet<K>>,
    /// Unmapped keys by partition; [`PARTITION_NOT_FOUND`] holds the keys
    /// whose partition could not be resolved.
    pub unmapped: HashMap<i32, HashSet<K>>,
    /// The partition each host was picked for first.
    pub host_partitions: HashMap<Uri, i32>,
}

impl<K: Eq + Hash> UriMappingResult<K> {
    pub fn empty() -> Self {
        Self {
            mapped: HashMap::new(),
            unmapped: HashMap::new(),
            host_partitions: HashMap::new(),
        }
    }

    pub fn mapped_key_count(&self) -> usize {
        self.mapped.values().map(HashSet::len).sum()
    }

    pub fn unmapped_key_count(&self) -> usize {
        self.unmapped.values().map(HashSet::len).sum()
    }
}

/// Groups the requests of one batch call by destination host.
#[derive(Debug, Clone)]
pub struct UriMapper {
    state: LoadBalancerState,
}

impl UriMapper {
    pub fn new(state: LoadBalancerState) -> Self {
        Self { state }
    }

    /// Splits a batch into per-host groups in two passes.
    ///
    /// Requests are first assigned a partition from their URI (everything
    /// is partition 0 on unpartitioned clusters). Each partition's requests
    /// are then placed on that partition's ring: with sticky routing every
    /// request URI is hashed on its own, otherwise the whole partition goes
    /// to one randomly picked host.
    ///
    /// All requests must target the same service; the first one names it.
    ///
    /// # Errors
    /// `RouteError::ServiceUnavailable` when the service cannot be routed,
    /// and `RouteError::InvalidRequest` when more than one request carries
    /// partition ids.
    pub fn map_uris<K>(&self, pairs: Vec<UriKeyPair<K>>) -> Result<UriMappingResult<K>>
    where
        K: Eq + Hash + Clone,
    {
        let Some(sample) = pairs.first() else {
            return Ok(UriMappingResult::empty());
        };
        let route = self.state.route(service_name(&sample.request_uri)?)?;

        let mut result = UriMappingResult::empty();
        let by_partition = distribute_to_partitions(&route, pairs, &mut result)?;
        distribute_to_hosts(&route, by_partition, &mut result);

        debug!(
            service = %route.service.service_name,
            hosts = result.mapped.len(),
            mapped = result.mapped_key_count(),
            unmapped = result.unmapped_key_count(),
            "Mapped request URIs"
        );
        Ok(result)
    }

    /// Whether a call to `service` may need more than one request: true
    /// when routing is sticky or the cluster has several partitions.
    pub fn need_scatter_gather(&self, service: &str) -> Result<bool> {
        let route = self.state.route(service)?;
        Ok(route.strategy.is_sticky() || route.generation.max_partition_id() > 0)
    }
}

fn distribute_to_partitions<K: Eq + Hash>(
    route: &ServiceRoute,
    pairs: Vec<UriKeyPair<K>>,
    result: &mut UriMappingResult<K>,
) -> Result<HashMap<i32, Vec<UriKeyPair<K>>>> {
    let accessor = &route.generation.accessor;
    let overriding = pairs.iter().any(|p| p.partition_ids.is_some());
    if overriding && pairs.len() > 1 {
        return Err(RouteError::InvalidRequest(
            "only one request may carry partition ids; put every partition id in it".to_string(),
        ));
    }
    if accessor.max_partition_id() == DEFAULT_PARTITION_ID {
        return Ok(HashMap::from([(DEFAULT_PARTITION_ID, pairs)]));
    }

    if overriding {
        debug!("Using partition ids supplied with the request");
        let mut by_partition = HashMap::new();
        for pair in pairs {
            let ids = pair.partition_ids.clone().unwrap_or_default();
            for id in ids {
                by_partition.insert(
                    id,
                    vec![UriKeyPair {
                        request_uri: pair.request_uri.clone(),
                        key: None,
                        partition_ids: None,
                    }],
                );
            }
        }
        return Ok(by_partition);
    }

    let mut by_partition: HashMap<i32, Vec<UriKeyPair<K>>> = HashMap::new();
    for pair in pairs {
        match accessor.partition_id_for_uri(&pair.request_uri) {
            Ok(id) => by_partition.entry(id).or_default().push(pair),
            Err(e) => {
                trace!("No partition for {}: {}", pair.request_uri, e);
                if let Some(key) = pair.key {
                    result
                        .unmapped
                        .entry(PARTITION_NOT_FOUND)
                        .or_default()
                        .insert(key);
                }
            }
        }
    }
    Ok(by_partition)
}

fn distribute_to_hosts<K: Eq + Hash>(
    route: &ServiceRoute,
    by_partition: HashMap<i32, Vec<UriKeyPair<K>>>,
    result: &mut UriMappingResult<K>,
) {
    let request_hash = route.strategy.request_hash();
    let sticky = request_hash.is_sticky();
    let mut rings = RingCache::new(route);

    for (partition_id, pairs) in by_partition {
        let ring = rings.get(partition_id);
        if ring.is_empty() {
            let keys = pairs.into_iter().filter_map(|p| p.key);
            result.unmapped.entry(partition_id).or_default().extend(keys);
            continue;
        }

        // A non-empty ring always yields a host.
        let partition_host = if sticky {
            None
        } else {
            ring.get(random_hash()).cloned()
        };

        for pair in pairs {
            let host = match &partition_host {
                Some(host) => Some(host.clone()),
                None => ring.get(request_hash.hash_uri(&pair.request_uri)).cloned(),
            };
            let Some(host) = host else {
                continue;
            };
            result.host_partitions.entry(host.clone()).or_insert(partition_id);
            let keys = result.mapped.entry(host).or_default();
            if let Some(key) = pair.key {
                keys.insert(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{articles_service, articles_state, range_cluster, state_with, uri};
    use meshroute_common::keys;
    use meshroute_common::properties::{ClusterProperties, ServiceProperties, UriProperties};

    fn request(id: u32) -> UriKeyPair<u32> {
        UriKeyPair::new(uri(&format!("d2://articles/items?id={}", id)), id)
    }

    fn sticky_service() -> ServiceProperties {
        articles_service()
            .with_strategy_property(keys::HASH_METHOD, keys::HASH_METHOD_URI_REGEX)
            .with_strategy_property(keys::HASH_CONFIG_REGEXES, r"id=(\d+)")
    }

    #[tokio::test]
    async fn test_empty_batch_maps_to_nothing() {
        let mapper = UriMapper::new(articles_state(articles_service()).await);
        let result = mapper.map_uris::<u32>(Vec::new()).unwrap();
        assert_eq!(result, UriMappingResult::empty());
    }

    #[tokio::test]
    async fn test_non_sticky_sends_partition_to_one_host() {
        let mapper = UriMapper::new(articles_state(articles_service()).await);
        let result = mapper.map_uris(vec![request(0), request(1), request(2)]).unwrap();

        assert_eq!(result.mapped.len(), 1);
        let (host, keys) = result.mapped.iter().next().unwrap();
        assert_eq!(keys, &HashSet::from([0, 1, 2]));
        assert_eq!(result.host_partitions[host], 0);
    }

    #[tokio::test]
    async fn test_unresolvable_and_hostless_partitions_are_unmapped() {
        let mapper = UriMapper::new(articles_state(articles_service()).await);
        let pairs = vec![
            request(4),
            request(13),
            request(99),
            UriKeyPair::new(uri("d2://articles/items?name=abc"), 1000),
        ];
        let result = mapper.map_uris(pairs).unwrap();

        assert_eq!(result.unmapped[&PARTITION_NOT_FOUND], HashSet::from([99, 1000]));
        assert_eq!(result.unmapped[&3], HashSet::from([13]));
        assert_eq!(result.mapped_key_count(), 1);
        assert_eq!(result.host_partitions.values().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_sticky_routing_is_repeatable() {
        let mapper = UriMapper::new(articles_state(sticky_service()).await);
        let pairs: Vec<_> = (0..12).map(request).collect();

        let first = mapper.map_uris(pairs.clone()).unwrap();
        for _ in 0..20 {
            assert_eq!(mapper.map_uris(pairs.clone()).unwrap().mapped, first.mapped);
        }
        assert_eq!(first.mapped_key_count(), 12);
    }

    #[tokio::test]
    async fn test_partition_override() {
        let mapper = UriMapper::new(articles_state(articles_service()).await);
        let pair = UriKeyPair::<u32>::with_partition_ids(uri("d2://articles/items"), [0, 1, 2, 3]);
        let result = mapper.map_uris(vec![pair]).unwrap();

        let partitions: BTreeSet<i32> = result.host_partitions.values().copied().collect();
        assert!(partitions.is_subset(&BTreeSet::from([0, 1, 2])));
        assert!(partitions.contains(&2));
        assert!(result.mapped.values().all(HashSet::is_empty));
        // Partition 3 has no hosts; there are no keys to report for it.
        assert!(result.unmapped.get(&3).map(HashSet::is_empty).unwrap_or(true));
    }

    #[tokio::test]
    async fn test_more_than_one_override_is_rejected() {
        let mapper = UriMapper::new(articles_state(articles_service()).await);
        let pairs = vec![
            UriKeyPair::<u32>::with_partition_ids(uri("d2://articles/a"), [0]),
            UriKeyPair::<u32>::with_partition_ids(uri("d2://articles/b"), [1]),
        ];
        assert!(matches!(mapper.map_uris(pairs), Err(RouteError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_more_than_one_override_is_rejected_without_partitioning() {
        let mapper = UriMapper::new(
            state_with(
                ClusterProperties::new("single-cluster"),
                UriProperties::new("single-cluster").with_host(uri("http://a:1/svc"), 1.0),
                ServiceProperties::new("single", "single-cluster"),
            )
            .await,
        );
        let pairs = vec![
            UriKeyPair::<u32>::with_partition_ids(uri("d2://single/a"), [0]),
            UriKeyPair::<u32>::with_partition_ids(uri("d2://single/b"), [0]),
        ];
        assert!(matches!(mapper.map_uris(pairs), Err(RouteError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_need_scatter_gather() {
        let partitioned = UriMapper::new(articles_state(articles_service()).await);
        assert!(partitioned.need_scatter_gather("articles").unwrap());

        let single = UriMapper::new(
            state_with(
                ClusterProperties::new("single-cluster"),
                UriProperties::new("single-cluster").with_host(uri("http://a:1/svc"), 1.0),
                ServiceProperties::new("single", "single-cluster"),
            )
            .await,
        );
        assert!(!single.need_scatter_gather("single").unwrap());

        let sticky = UriMapper::new(
            state_with(
                range_cluster("sticky-cluster", 100, 1),
                UriProperties::new("sticky-cluster").with_host(uri("http://a:1/svc"), 1.0),
                ServiceProperties::new("sticky", "sticky-cluster")
                    .with_strategy_property(keys::HASH_METHOD, keys::HASH_METHOD_URI_REGEX)
                    .with_strategy_property(keys::HASH_CONFIG_REGEXES, r"id=(\d+)"),
            )
            .await,
        );
        assert!(sticky.need_scatter_gather("sticky").unwrap());

        assert!(matches!(
            single.need_scatter_gather("unknown"),
            Err(RouteError::ServiceUnavailable(_))
        ));
    }
}
