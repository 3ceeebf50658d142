use std::collections::HashSet;

use http::Uri;
use serde::{Deserialize, Serialize};

use super::partition::PartitionProperties;
use crate::config::PropertyMap;
use crate::error::{Result, RouteError};
use crate::keys;
use crate::uri::uri_set;

fn default_schemes() -> Vec<String> {
    vec!["http".to_string()]
}

/// Cluster-wide routing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterProperties {
    pub cluster_name: String,
    /// Schemes tried in order when picking a strategy for a service.
    #[serde(default = "default_schemes")]
    pub prioritized_schemes: Vec<String>,
    #[serde(default, rename = "partitionProperties")]
    pub partition: PartitionProperties,
    #[serde(default)]
    pub properties: PropertyMap,
    /// Hosts that must never be selected, whatever their announced weight.
    #[serde(default, with = "uri_set")]
    pub banned_uris: HashSet<Uri>,
}

impl ClusterProperties {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            prioritized_schemes: default_schemes(),
            partition: PartitionProperties::None,
            properties: PropertyMap::new(),
            banned_uris: HashSet::new(),
        }
    }

    pub fn with_partition(mut self, partition: PartitionProperties) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_schemes<S: Into<String>>(mut self, schemes: impl IntoIterator<Item = S>) -> Self {
        self.prioritized_schemes = schemes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_banned(mut self, uri: Uri) -> Self {
        self.banned_uris.insert(uri);
        self
    }

    pub fn is_banned(&self, uri: &Uri) -> bool {
        self.banned_uris.contains(uri)
    }

    /// Validates the snapshot, resolving flat-map partitioning if present.
    ///
    /// Clusters published by stores that only speak flat maps carry their
    /// partition description in `properties`; structured partitioning wins
    /// when both are given.
    pub fn validated(mut self) -> Result<Self> {
        if self.cluster_name.trim().is_empty() {
            return Err(RouteError::malformed("clusterName", "cluster name is empty"));
        }
        if self.partition == PartitionProperties::None
            && self.properties.contains_key(keys::PARTITION_TYPE)
        {
            self.partition = PartitionProperties::from_map(&self.properties)?;
        }
        self.partition.validate()?;
        Ok(self)
    }
}
