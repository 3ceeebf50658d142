//! Key to host mapping for batch and fan-out calls.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use http::Uri;
use meshroute_common::error::{PartitionAccessError, Result, RouteError};
use meshroute_common::uri::service_name;
use tracing::debug;

use crate::context::RequestContext;
use crate::hashing::{hash_key, random_hash, HashRing};
use crate::state::{LoadBalancerState, ServiceRoute};

/// Why a key was left out of every host bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmappedReason {
    /// The key could not be assigned to a partition.
    NoPartition(PartitionAccessError),
    /// The key's partition has no available host.
    NoHost { partition_id: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmappedKey<K> {
    pub key: K,
    pub reason: UnmappedReason,
}

impl<K> UnmappedKey<K> {
    pub fn new(key: K, reason: UnmappedReason) -> Self {
        Self { key, reason }
    }
}

/// Keys grouped by the host that should serve them.
///
/// Every input key is either in exactly one host bucket or in
/// [`unmapped`](Self::unmapped). Callers must check the unmapped keys even
/// when the call succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct MapKeyResult<K> {
    pub mapped: HashMap<Uri, Vec<K>>,
    pub unmapped: Vec<UnmappedKey<K>>,
}

impl<K> MapKeyResult<K> {
    pub fn mapped_key_count(&self) -> usize {
        self.mapped.values().map(Vec::len).sum()
    }

    pub fn host_count(&self) -> usize {
        self.mapped.len()
    }
}

impl<K> Default for MapKeyResult<K> {
    fn default() -> Self {
        Self {
            mapped: HashMap::new(),
            unmapped: Vec::new(),
        }
    }
}

/// The keys of one partition and its hosts in preference order.
#[derive(Debug, Clone, PartialEq)]
pub struct KeysAndHosts<K> {
    pub keys: Vec<K>,
    pub hosts: Vec<Uri>,
}

/// Per-partition host lists for retries and fan-out.
///
/// Each partition carries up to `limit_hosts_per_partition` distinct hosts,
/// ordered by ring preference. Wave `i` of a call sends every partition's
/// keys to that partition's `i`-th host; see
/// [`result_for_iteration`](Self::result_for_iteration).
#[derive(Debug, Clone, PartialEq)]
pub struct HostToKeyMapper<K> {
    partitions: BTreeMap<i32, KeysAndHosts<K>>,
    unmapped: Vec<UnmappedKey<K>>,
    limit_hosts_per_partition: usize,
}

impl<K: Clone> HostToKeyMapper<K> {
    pub fn partition_info(&self) -> &BTreeMap<i32, KeysAndHosts<K>> {
        &self.partitions
    }

    /// Keys that could not be assigned to any partition.
    pub fn unmapped_keys(&self) -> &[UnmappedKey<K>] {
        &self.unmapped
    }

    pub fn limit_hosts_per_partition(&self) -> usize {
        self.limit_hosts_per_partition
    }

    /// Partitions with no available host at all.
    pub fn partitions_without_hosts(&self) -> Vec<i32> {
        self.partitions
            .iter()
            .filter(|(_, info)| info.hosts.is_empty())
            .map(|(&id, _)| id)
            .collect()
    }

    /// Partitions with fewer hosts than were asked for.
    pub fn partitions_without_enough_hosts(&self) -> Vec<i32> {
        self.partitions
            .iter()
            .filter(|(_, info)| info.hosts.len() < self.limit_hosts_per_partition)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Keys grouped by the `iteration`-th host of their partition.
    ///
    /// Keys of partitions with fewer hosts become unmapped with
    /// [`UnmappedReason::NoHost`], alongside the keys that had no
    /// partition. A host serving several partitions gets all their keys.
    pub fn result_for_iteration(&self, iteration: usize) -> MapKeyResult<K> {
        let mut result = MapKeyResult {
            mapped: HashMap::new(),
            unmapped: self.unmapped.clone(),
        };

        for (&partition_id, info) in &self.partitions {
            match info.hosts.get(iteration) {
                Some(host) => result
                    .mapped
                    .entry(host.clone())
                    .or_default()
                    .extend(info.keys.iter().cloned()),
                None => result.unmapped.extend(
                    info.keys
                        .iter()
                        .cloned()
                        .map(|key| UnmappedKey::new(key, UnmappedReason::NoHost { partition_id })),
                ),
            }
        }

        result
    }
}

/// Maps application keys of a service to hosts.
///
/// Lookups read the last published cluster generation and never wait on
/// property ingestion.
#[derive(Debug, Clone)]
pub struct KeyMapper {
    state: LoadBalancerState,
}

impl KeyMapper {
    pub fn new(state: LoadBalancerState) -> Self {
        Self { state }
    }

    /// Maps each key to a single host.
    ///
    /// # Arguments
    /// * `service_uri` - URI naming the service, e.g. `d2://articles`
    /// * `keys` - Keys to map; their `Display` form is the partition key
    ///
    /// # Errors
    /// `RouteError::ServiceUnavailable` when the service or its strategy
    /// cannot be resolved. Per-key failures are reported in the result.
    pub fn map_keys_v2<K, I>(&self, service_uri: &Uri, keys: I) -> Result<MapKeyResult<K>>
    where
        K: fmt::Display,
        I: IntoIterator<Item = K>,
    {
        self.map_keys_v2_with_context(service_uri, keys, &RequestContext::default())
    }

    pub fn map_keys_v2_with_context<K, I>(
        &self,
        service_uri: &Uri,
        keys: I,
        ctx: &RequestContext,
    ) -> Result<MapKeyResult<K>>
    where
        K: fmt::Display,
        I: IntoIterator<Item = K>,
    {
        let route = self.route(service_uri)?;
        let mut rings = RingCache::new(&route);
        let mut result = MapKeyResult::default();

        for key in keys {
            let raw = key.to_string();
            let partition_id = match route.generation.accessor.partition_id(&raw) {
                Ok(id) => id,
                Err(e) => {
                    result
                        .unmapped
                        .push(UnmappedKey::new(key, UnmappedReason::NoPartition(e)));
                    continue;
                }
            };

            let host = match &ctx.target_host {
                Some(target) => Some(target.clone()),
                None => rings.get(partition_id).get(hash_key(&raw)).cloned(),
            };
            match host {
                Some(host) => result.mapped.entry(host).or_default().push(key),
                None => result
                    .unmapped
                    .push(UnmappedKey::new(key, UnmappedReason::NoHost { partition_id })),
            }
        }

        debug!(
            service = %route.service.service_name,
            hosts = result.host_count(),
            mapped = result.mapped_key_count(),
            unmapped = result.unmapped.len(),
            "Mapped keys"
        );
        Ok(result)
    }

    /// Maps keys to up to `limit_hosts_per_partition` hosts per partition.
    ///
    /// # Arguments
    /// * `service_uri` - URI naming the service
    /// * `keys` - Keys to map
    /// * `limit_hosts_per_partition` - Distinct hosts wanted per partition;
    ///   fewer are returned when fewer exist
    /// * `sticky_key` - Fixes the ring starting point, so repeated calls with
    ///   the same key and unchanged membership order hosts identically
    ///
    /// # Errors
    /// `RouteError::InvalidRequest` for a zero host limit, and
    /// `RouteError::ServiceUnavailable` as for [`map_keys_v2`](Self::map_keys_v2).
    pub fn map_keys_v3<K, I>(
        &self,
        service_uri: &Uri,
        keys: I,
        limit_hosts_per_partition: usize,
        sticky_key: Option<&str>,
    ) -> Result<HostToKeyMapper<K>>
    where
        K: fmt::Display,
        I: IntoIterator<Item = K>,
    {
        self.map_keys_v3_with_context(
            service_uri,
            keys,
            limit_hosts_per_partition,
            sticky_key,
            &RequestContext::default(),
        )
    }

    pub fn map_keys_v3_with_context<K, I>(
        &self,
        service_uri: &Uri,
        keys: I,
        limit_hosts_per_partition: usize,
        sticky_key: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<HostToKeyMapper<K>>
    where
        K: fmt::Display,
        I: IntoIterator<Item = K>,
    {
        check_limit(limit_hosts_per_partition)?;
        let route = self.route(service_uri)?;

        let mut by_partition: BTreeMap<i32, Vec<K>> = BTreeMap::new();
        let mut unmapped = Vec::new();
        for key in keys {
            match route.generation.accessor.partition_id(&key.to_string()) {
                Ok(id) => by_partition.entry(id).or_default().push(key),
                Err(e) => unmapped.push(UnmappedKey::new(key, UnmappedReason::NoPartition(e))),
            }
        }

        let sticky = sticky_key.map(hash_key);
        let partitions = by_partition
            .into_iter()
            .map(|(id, keys)| {
                let hosts = hosts_for_partition(&route, id, limit_hosts_per_partition, sticky, ctx);
                (id, KeysAndHosts { keys, hosts })
            })
            .collect();

        Ok(HostToKeyMapper {
            partitions,
            unmapped,
            limit_hosts_per_partition,
        })
    }

    /// Up to `num_hosts_per_partition` hosts for every partition of the
    /// service's cluster, with no keys attached.
    ///
    /// Partitions without hosts are listed with an empty host list instead
    /// of failing the call.
    pub fn all_partitions_multiple_hosts<K>(
        &self,
        service_uri: &Uri,
        num_hosts_per_partition: usize,
        sticky_key: Option<&str>,
    ) -> Result<HostToKeyMapper<K>> {
        self.all_partitions_multiple_hosts_with_context(
            service_uri,
            num_hosts_per_partition,
            sticky_key,
            &RequestContext::default(),
        )
    }

    pub fn all_partitions_multiple_hosts_with_context<K>(
        &self,
        service_uri: &Uri,
        num_hosts_per_partition: usize,
        sticky_key: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<HostToKeyMapper<K>> {
        check_limit(num_hosts_per_partition)?;
        let route = self.route(service_uri)?;
        let sticky = sticky_key.map(hash_key);

        let partitions = route
            .generation
            .partition_ids()
            .map(|id| {
                let hosts = hosts_for_partition(&route, id, num_hosts_per_partition, sticky, ctx);
                (id, KeysAndHosts { keys: Vec::new(), hosts })
            })
            .collect();

        Ok(HostToKeyMapper {
            partitions,
            unmapped: Vec::new(),
            limit_hosts_per_partition: num_hosts_per_partition,
        })
    }

    fn route(&self, service_uri: &Uri) -> Result<ServiceRoute> {
        self.state.route(service_name(service_uri)?)
    }
}

fn check_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(RouteError::InvalidRequest(
            "at least one host per partition must be requested".to_string(),
        ));
    }
    Ok(())
}

fn hosts_for_partition(
    route: &ServiceRoute,
    partition_id: i32,
    limit: usize,
    sticky: Option<u32>,
    ctx: &RequestContext,
) -> Vec<Uri> {
    if let Some(target) = &ctx.target_host {
        return vec![target.clone()];
    }
    let ring = route.ring(partition_id);
    let start = sticky.unwrap_or_else(random_hash);
    ring.ordered_hosts(start).take(limit).cloned().collect()
}

/// Rings of one route, fetched once per partition per call.
pub(crate) struct RingCache<'a> {
    route: &'a ServiceRoute,
    rings: HashMap<i32, Arc<HashRing>>,
}

impl<'a> RingCache<'a> {
    pub(crate) fn new(route: &'a ServiceRoute) -> Self {
        Self {
            route,
            rings: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, partition_id: i32) -> &HashRing {
        let route = self.route;
        self.rings
            .entry(partition_id)
            .or_insert_with(|| route.ring(partition_id))
    }
}
