//! Property dumps and the reports built from them.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use http::Uri;
use meshroute_balancer::{
    KeyMapper, LoadBalancerState, RequestContext, ServiceRoute, SimpleLoadBalancer, UnmappedKey,
    UnmappedReason,
};
use meshroute_common::{ClusterProperties, PropertyEvent, PropertyValue, ServiceProperties, UriProperties};
use serde::{Deserialize, Serialize};

/// Everything a property store holds for a set of services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyDump {
    #[serde(default)]
    pub clusters: Vec<ClusterProperties>,
    #[serde(default)]
    pub services: Vec<ServiceProperties>,
    #[serde(default)]
    pub uris: Vec<UriProperties>,
}

impl PropertyDump {
    /// Reads a dump from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read property dump {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid property dump {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Every property of the dump, validated, in publishing order.
    ///
    /// `uris` may hold one announcement per node; those of one cluster are
    /// merged into a single membership.
    pub fn values(self) -> Result<Vec<PropertyValue>> {
        let mut announcements: BTreeMap<String, Vec<UriProperties>> = BTreeMap::new();
        for announcement in self.uris {
            announcements
                .entry(announcement.cluster_name.clone())
                .or_default()
                .push(announcement);
        }

        let clusters = self.clusters.into_iter().map(PropertyValue::Cluster);
        let uris = announcements
            .into_iter()
            .map(|(cluster, nodes)| PropertyValue::Uri(UriProperties::merge(cluster, nodes)));
        let services = self.services.into_iter().map(PropertyValue::Service);

        clusters
            .chain(uris)
            .chain(services)
            .map(|value| {
                let label = format!("{} {}", value.kind(), value.name());
                value.validated().with_context(|| format!("Invalid {}", label))
            })
            .collect()
    }

    /// Starts a load balancer state holding exactly this dump.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn into_state(self) -> Result<LoadBalancerState> {
        let values = self.values()?;
        let (state, sender) = LoadBalancerState::builder().spawn()?;
        for value in values {
            sender.send(PropertyEvent::add(value)).await?;
        }
        sender.flush().await?;
        tracing::debug!(
            clusters = state.cluster_names().len(),
            services = state.service_names().len(),
            "Loaded property dump"
        );
        Ok(state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostShare {
    pub host: String,
    pub weight: f64,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionHosts {
    pub partition_id: i32,
    pub hosts: Vec<HostShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionsReport {
    pub service: String,
    pub cluster: String,
    pub scheme: String,
    pub strategy: String,
    pub partitioning: serde_json::Value,
    pub partitions: Vec<PartitionHosts>,
}

/// Hosts of every partition of `service`'s cluster, with their announced
/// weights and current ring points.
pub fn partitions_report(state: &LoadBalancerState, service: &str) -> Result<PartitionsReport> {
    let route = state.route(service)?;
    let partitions = route
        .generation
        .partition_ids()
        .map(|partition_id| partition_hosts(&route, partition_id))
        .collect();

    Ok(PartitionsReport {
        service: service.to_string(),
        cluster: route.generation.cluster_name().to_string(),
        scheme: route.scheme.clone(),
        strategy: route.strategy.name().to_string(),
        partitioning: serde_json::to_value(&route.generation.cluster.partition)?,
        partitions,
    })
}

fn partition_hosts(route: &ServiceRoute, partition_id: i32) -> PartitionHosts {
    let (scheme, strategy) = route.for_partition(partition_id);
    let ring = strategy.ring(&route.generation, partition_id);
    let mut hosts: Vec<HostShare> = route
        .generation
        .hosts_for_partition(partition_id, Some(scheme))
        .into_iter()
        .map(|(host, weight)| HostShare {
            host: host.to_string(),
            weight,
            points: ring.point_count(host),
        })
        .collect();
    hosts.sort_by(|a, b| a.host.cmp(&b.host));
    PartitionHosts { partition_id, hosts }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RingReport {
    pub service: String,
    pub partition_id: i32,
    pub total_points: usize,
    /// Host to the fraction of ring points it holds.
    pub shares: BTreeMap<String, f64>,
    pub points: BTreeMap<String, u32>,
}

pub fn ring_report(state: &LoadBalancerState, service: &str, partition_id: i32) -> Result<RingReport> {
    let route = state.route(service)?;
    anyhow::ensure!(
        (0..=route.generation.max_partition_id()).contains(&partition_id),
        "Partition {} does not exist; service {} has partitions 0..={}",
        partition_id,
        service,
        route.generation.max_partition_id()
    );

    let ring = route.ring(partition_id);
    let total_points = ring.len();
    let points: BTreeMap<String, u32> = ring
        .point_counts()
        .iter()
        .map(|(host, &count)| (host.to_string(), count))
        .collect();
    let shares = points
        .iter()
        .map(|(host, &count)| (host.clone(), f64::from(count) / total_points.max(1) as f64))
        .collect();

    Ok(RingReport {
        service: service.to_string(),
        partition_id,
        total_points,
        shares,
        points,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmappedEntry {
    pub key: String,
    pub reason: String,
}

impl From<UnmappedKey<String>> for UnmappedEntry {
    fn from(unmapped: UnmappedKey<String>) -> Self {
        let reason = match unmapped.reason {
            UnmappedReason::NoPartition(e) => e.to_string(),
            UnmappedReason::NoHost { partition_id } => {
                format!("no available host in partition {}", partition_id)
            }
        };
        Self {
            key: unmapped.key,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyMappingReport {
    /// Host to the keys it serves.
    pub mapped: BTreeMap<String, Vec<String>>,
    pub unmapped: Vec<UnmappedEntry>,
}

/// Where each key would be sent, one host per key.
pub fn map_keys_report(state: &LoadBalancerState, service: &str, keys: Vec<String>) -> Result<KeyMappingReport> {
    let mapper = KeyMapper::new(state.clone());
    let result = mapper.map_keys_v2(&service_uri(service)?, keys)?;

    let mapped = result
        .mapped
        .into_iter()
        .map(|(host, mut keys)| {
            keys.sort();
            (host.to_string(), keys)
        })
        .collect();
    Ok(KeyMappingReport {
        mapped,
        unmapped: result.unmapped.into_iter().map(UnmappedEntry::from).collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionKeys {
    pub keys: Vec<String>,
    /// In preference order.
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiHostReport {
    pub partitions: BTreeMap<i32, PartitionKeys>,
    pub partitions_without_enough_hosts: Vec<i32>,
    pub unmapped: Vec<UnmappedEntry>,
}

/// Keys grouped by partition, each with up to `hosts_per_partition` hosts.
/// Without keys every partition of the cluster is listed.
pub fn multi_host_report(
    state: &LoadBalancerState,
    service: &str,
    keys: Vec<String>,
    hosts_per_partition: usize,
    sticky_key: Option<&str>,
) -> Result<MultiHostReport> {
    let mapper = KeyMapper::new(state.clone());
    let uri = service_uri(service)?;
    let mapping = if keys.is_empty() {
        mapper.all_partitions_multiple_hosts(&uri, hosts_per_partition, sticky_key)?
    } else {
        mapper.map_keys_v3(&uri, keys, hosts_per_partition, sticky_key)?
    };

    let partitions = mapping
        .partition_info()
        .iter()
        .map(|(&id, info)| {
            (
                id,
                PartitionKeys {
                    keys: info.keys.clone(),
                    hosts: info.hosts.iter().map(Uri::to_string).collect(),
                },
            )
        })
        .collect();

    Ok(MultiHostReport {
        partitions,
        partitions_without_enough_hosts: mapping.partitions_without_enough_hosts(),
        unmapped: mapping
            .unmapped_keys()
            .iter()
            .cloned()
            .map(UnmappedEntry::from)
            .collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolveReport {
    pub service: String,
    pub host: String,
    pub request_uri: String,
    pub scheme: String,
    pub partition_id: i32,
}

/// The host and rewritten URI for one `d2://service/...` request.
pub fn resolve_report(state: &LoadBalancerState, request: &str) -> Result<ResolveReport> {
    let request: Uri = request
        .parse()
        .with_context(|| format!("Invalid request URI '{}'", request))?;
    let balancer = SimpleLoadBalancer::new(state.clone());
    let endpoint = balancer.resolve(&request, &RequestContext::default())?;

    Ok(ResolveReport {
        service: endpoint.service,
        host: endpoint.host.to_string(),
        request_uri: endpoint.request_uri.to_string(),
        scheme: endpoint.scheme,
        partition_id: endpoint.partition_id,
    })
}

fn service_uri(service: &str) -> Result<Uri> {
    format!("d2://{}", service)
        .parse()
        .with_context(|| format!("Invalid service name '{}'", service))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"{
        "clusters": [{
            "clusterName": "articles-cluster",
            "partitionProperties": {
                "partitionType": "RANGE",
                "partitionKeyRegex": "(\\d+)",
                "keyRangeStart": 0,
                "partitionSize": 10,
                "partitionCount": 2
            }
        }],
        "uris": [{
            "clusterName": "articles-cluster",
            "partitions": {
                "http://a:8080/articles": {"0": {"weight": 1.0}},
                "http://b:8080/articles": {"0": {"weight": 0.5}, "1": {"weight": 1.0}}
            }
        }],
        "services": [{"serviceName": "articles", "clusterName": "articles-cluster"}]
    }"#;

    async fn state() -> LoadBalancerState {
        PropertyDump::from_json(DUMP).unwrap().into_state().await.unwrap()
    }

    #[test]
    fn test_values_rejects_invalid_properties() {
        let dump = PropertyDump::from_json(
            r#"{"clusters": [{"clusterName": "c", "partitionProperties": {
                "partitionType": "RANGE", "partitionKeyRegex": "(\\d+)",
                "keyRangeStart": 0, "partitionSize": 0, "partitionCount": 2}}]}"#,
        )
        .unwrap();
        let err = dump.values().unwrap_err();
        assert!(err.to_string().contains("cluster c"));
    }

    #[test]
    fn test_node_announcements_are_merged_per_cluster() {
        let dump = PropertyDump::from_json(
            r#"{"uris": [
                {"clusterName": "c", "partitions": {"http://a:1": {"0": {"weight": 1.0}}}},
                {"clusterName": "d", "partitions": {"http://z:1": {"0": {"weight": 1.0}}}},
                {"clusterName": "c", "partitions": {"http://b:1": {"1": {"weight": 0.5}}}}
            ]}"#,
        )
        .unwrap();

        let values = dump.values().unwrap();
        assert_eq!(values.len(), 2);
        let PropertyValue::Uri(c) = &values[0] else {
            panic!("expected uris, got {:?}", values[0]);
        };
        assert_eq!(c.cluster_name, "c");
        assert_eq!(c.partitions.len(), 2);
        assert_eq!(c.partition_ids(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_partitions_report() {
        let report = partitions_report(&state().await, "articles").unwrap();
        assert_eq!(report.cluster, "articles-cluster");
        assert_eq!(report.scheme, "http");
        assert_eq!(report.strategy, "degrader");
        assert_eq!(report.partitioning["partitionType"], "RANGE");
        assert_eq!(report.partitions.len(), 2);

        let p0 = &report.partitions[0];
        assert_eq!(p0.hosts.len(), 2);
        assert_eq!(p0.hosts[0].host, "http://a:8080/articles");
        assert_eq!(p0.hosts[0].points, 100);
        assert_eq!(p0.hosts[1].points, 50);
    }

    #[tokio::test]
    async fn test_ring_report_shares() {
        let state = state().await;
        let report = ring_report(&state, "articles", 0).unwrap();
        assert_eq!(report.total_points, 150);
        let share = report.shares["http://b:8080/articles"];
        assert!((share - 1.0 / 3.0).abs() < 1e-9);

        assert!(ring_report(&state, "articles", 2).is_err());
        assert!(ring_report(&state, "unknown", 0).is_err());
    }

    #[tokio::test]
    async fn test_map_keys_report() {
        let keys = vec!["3".to_string(), "15".to_string(), "25".to_string(), "abc".to_string()];
        let report = map_keys_report(&state().await, "articles", keys).unwrap();

        assert!(report.mapped["http://b:8080/articles"].contains(&"15".to_string()));
        assert_eq!(report.unmapped.len(), 2);
        let total: usize = report.mapped.values().map(Vec::len).sum();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_multi_host_report_lists_every_partition() {
        let report = multi_host_report(&state().await, "articles", Vec::new(), 2, Some("s")).unwrap();
        assert_eq!(report.partitions.len(), 2);
        assert_eq!(report.partitions[&0].hosts.len(), 2);
        assert_eq!(report.partitions[&1].hosts, vec!["http://b:8080/articles".to_string()]);
        assert_eq!(report.partitions_without_enough_hosts, vec![1]);
    }

    #[tokio::test]
    async fn test_resolve_report() {
        let report = resolve_report(&state().await, "d2://articles/items?id=12").unwrap();
        assert_eq!(report.partition_id, 1);
        assert_eq!(report.host, "http://b:8080/articles");
        assert_eq!(report.request_uri, "http://b:8080/articles/items?id=12");
    }
}
