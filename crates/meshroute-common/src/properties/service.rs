use serde::{Deserialize, Serialize};

use crate::config::PropertyMap;
use crate::error::{Result, RouteError};

fn default_strategy_list() -> Vec<String> {
    vec!["degrader".to_string()]
}

/// Per-service routing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProperties {
    pub service_name: String,
    pub cluster_name: String,
    #[serde(default)]
    pub path: String,
    /// Strategy names in order of preference.
    #[serde(default = "default_strategy_list")]
    pub load_balancer_strategy_list: Vec<String>,
    #[serde(default)]
    pub load_balancer_strategy_properties: PropertyMap,
    #[serde(default)]
    pub degrader_properties: PropertyMap,
    #[serde(default, rename = "serviceMetadataProperties")]
    pub service_metadata: PropertyMap,
}

impl ServiceProperties {
    pub fn new(service_name: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            cluster_name: cluster_name.into(),
            path: String::new(),
            load_balancer_strategy_list: default_strategy_list(),
            load_balancer_strategy_properties: PropertyMap::new(),
            degrader_properties: PropertyMap::new(),
            service_metadata: PropertyMap::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_strategies<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.load_balancer_strategy_list = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strategy_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.load_balancer_strategy_properties
            .insert(key.into(), value.into());
        self
    }

    pub fn with_degrader_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.degrader_properties.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(RouteError::malformed("serviceName", "service name is empty"));
        }
        if self.cluster_name.trim().is_empty() {
            return Err(RouteError::malformed(
                "clusterName",
                format!("service '{}' has no cluster", self.service_name),
            ));
        }
        if self.load_balancer_strategy_list.is_empty() {
            return Err(RouteError::malformed(
                "loadBalancerStrategyList",
                format!("service '{}' lists no strategies", self.service_name),
            ));
        }
        Ok(())
    }
}
