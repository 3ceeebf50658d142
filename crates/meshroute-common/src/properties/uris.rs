use std::collections::HashMap;

use http::Uri;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouteError};
use crate::keys::DEFAULT_PARTITION_ID;
use crate::uri::uri_map;

/// Weight a host announces for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionData {
    pub weight: f64,
}

impl PartitionData {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Default for PartitionData {
    fn default() -> Self {
        Self { weight: 1.0 }
    }
}

/// Live membership of a cluster: every announced host and its partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UriProperties {
    pub cluster_name: String,
    #[serde(with = "uri_map", default)]
    pub partitions: HashMap<Uri, HashMap<i32, PartitionData>>,
}

impl UriProperties {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            partitions: HashMap::new(),
        }
    }

    /// Adds a host serving the default partition.
    pub fn with_host(self, uri: Uri, weight: f64) -> Self {
        self.with_partitions(uri, [(DEFAULT_PARTITION_ID, weight)])
    }

    /// Adds a host serving the given partitions.
    pub fn with_partitions(
        mut self,
        uri: Uri,
        partitions: impl IntoIterator<Item = (i32, f64)>,
    ) -> Self {
        let entry = self.partitions.entry(uri).or_default();
        for (id, weight) in partitions {
            entry.insert(id, PartitionData::new(weight));
        }
        self
    }

    /// Unions per-node announcements into one membership snapshot.
    ///
    /// Only the announcements passed in contribute: a node that stopped
    /// announcing simply has no entries in the result.
    pub fn merge(
        cluster_name: impl Into<String>,
        announcements: impl IntoIterator<Item = UriProperties>,
    ) -> Self {
        let mut merged = UriProperties::new(cluster_name);
        for announcement in announcements {
            for (uri, partitions) in announcement.partitions {
                merged.partitions.entry(uri).or_default().extend(partitions);
            }
        }
        merged
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Uri> {
        self.partitions.keys()
    }

    /// Hosts announcing `partition_id`, with their weights.
    pub fn hosts_for_partition(&self, partition_id: i32) -> impl Iterator<Item = (&Uri, f64)> {
        self.partitions.iter().filter_map(move |(uri, partitions)| {
            partitions.get(&partition_id).map(|data| (uri, data.weight))
        })
    }

    /// Partition ids served by at least one host, ascending.
    pub fn partition_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self
            .partitions
            .values()
            .flat_map(|partitions| partitions.keys().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Validates weights and fills in the default partition for hosts that
    /// announced none.
    pub fn validated(mut self) -> Result<Self> {
        if self.cluster_name.trim().is_empty() {
            return Err(RouteError::malformed("clusterName", "cluster name is empty"));
        }
        for (uri, partitions) in self.partitions.iter_mut() {
            if partitions.is_empty() {
                partitions.insert(DEFAULT_PARTITION_ID, PartitionData::default());
            }
            for (id, data) in partitions.iter() {
                if !data.weight.is_finite() || data.weight < 0.0 {
                    return Err(RouteError::malformed(
                        "partitionDesc",
                        format!("{} has invalid weight {} for partition {}", uri, data.weight, id),
                    ));
                }
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_merge_is_union_of_announcements() {
        let a = UriProperties::new("c").with_host(uri("http://a:1/"), 1.0);
        let b = UriProperties::new("c").with_partitions(uri("http://b:1/"), [(0, 0.5), (1, 2.0)]);

        let merged = UriProperties::merge("c", vec![a, b.clone()]);
        assert_eq!(merged.partitions.len(), 2);
        assert_eq!(merged.partition_ids(), vec![0, 1]);

        // a stopped announcing
        let merged = UriProperties::merge("c", vec![b]);
        assert_eq!(merged.partitions.len(), 1);
        assert!(!merged.partitions.contains_key(&uri("http://a:1/")));
    }

    #[test]
    fn test_hosts_for_partition() {
        let props = UriProperties::new("c")
            .with_partitions(uri("http://a:1/"), [(0, 1.0)])
            .with_partitions(uri("http://b:1/"), [(1, 3.0)]);

        let hosts: Vec<_> = props.hosts_for_partition(1).collect();
        assert_eq!(hosts, vec![(&uri("http://b:1/"), 3.0)]);
    }

    #[test]
    fn test_deserialize_with_integer_partition_keys() {
        let props: UriProperties = serde_json::from_str(
            r#"{
                "clusterName": "c",
                "partitions": {
                    "http://a:1/svc": {"0": {"weight": 1.0}, "3": {"weight": 0.5}},
                    "http://b:1/svc": {}
                }
            }"#,
        )
        .unwrap();

        let props = props.validated().unwrap();
        assert_eq!(props.partition_ids(), vec![0, 3]);
        assert_eq!(
            props.partitions[&uri("http://b:1/svc")][&0],
            PartitionData::default()
        );
    }

    #[test]
    fn test_negative_weight_is_rejected() {
        let props = UriProperties::new("c").with_host(uri("http://a:1/"), -1.0);
        assert!(props.validated().is_err());
    }
}
