//! Property change notifications delivered by the coordination layer.
//!
//! Every event carries a complete value: the consumer replaces its cached
//! snapshot wholesale and never applies deltas.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouteError};
use crate::properties::{ClusterProperties, ServiceProperties, UriProperties};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Cluster,
    Service,
    Uri,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::Cluster => write!(f, "cluster"),
            PropertyKind::Service => write!(f, "service"),
            PropertyKind::Uri => write!(f, "uri"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Cluster(ClusterProperties),
    Service(ServiceProperties),
    Uri(UriProperties),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Cluster(_) => PropertyKind::Cluster,
            PropertyValue::Service(_) => PropertyKind::Service,
            PropertyValue::Uri(_) => PropertyKind::Uri,
        }
    }

    /// Name the value is published under: the cluster name for cluster and
    /// uri properties, the service name for services.
    pub fn name(&self) -> &str {
        match self {
            PropertyValue::Cluster(cluster) => &cluster.cluster_name,
            PropertyValue::Service(service) => &service.service_name,
            PropertyValue::Uri(uris) => &uris.cluster_name,
        }
    }

    /// Decodes and validates a payload as stored by the property store.
    pub fn from_json(kind: PropertyKind, json: &str) -> Result<Self> {
        let value = match kind {
            PropertyKind::Cluster => PropertyValue::Cluster(serde_json::from_str(json)?),
            PropertyKind::Service => PropertyValue::Service(serde_json::from_str(json)?),
            PropertyKind::Uri => PropertyValue::Uri(serde_json::from_str(json)?),
        };
        value.validated()
    }

    pub fn validated(self) -> Result<Self> {
        Ok(match self {
            PropertyValue::Cluster(cluster) => PropertyValue::Cluster(cluster.validated()?),
            PropertyValue::Service(service) => {
                service.validate()?;
                PropertyValue::Service(service)
            }
            PropertyValue::Uri(uris) => PropertyValue::Uri(uris.validated()?),
        })
    }
}

/// What happened to a named property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyOp {
    /// First value seen after subscribing; `None` when the store has no value.
    Initialize(Option<PropertyValue>),
    Add(PropertyValue),
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEvent {
    pub kind: PropertyKind,
    pub name: String,
    pub op: PropertyOp,
}

impl PropertyEvent {
    pub fn add(value: PropertyValue) -> Self {
        Self {
            kind: value.kind(),
            name: value.name().to_string(),
            op: PropertyOp::Add(value),
        }
    }

    pub fn initialize(kind: PropertyKind, name: impl Into<String>, value: Option<PropertyValue>) -> Self {
        Self {
            kind,
            name: name.into(),
            op: PropertyOp::Initialize(value),
        }
    }

    pub fn remove(kind: PropertyKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            op: PropertyOp::Remove,
        }
    }

    /// The carried value, if any, checked against the event's kind and name.
    pub fn value(&self) -> Result<Option<&PropertyValue>> {
        let value = match &self.op {
            PropertyOp::Initialize(value) => value.as_ref(),
            PropertyOp::Add(value) => Some(value),
            PropertyOp::Remove => None,
        };
        if let Some(value) = value {
            if value.kind() != self.kind {
                return Err(RouteError::malformed(
                    &self.name,
                    format!("{} event carries a {} value", self.kind, value.kind()),
                ));
            }
            if value.name() != self.name {
                return Err(RouteError::malformed(
                    &self.name,
                    format!("event for '{}' carries a value named '{}'", self.name, value.name()),
                ));
            }
        }
        Ok(value)
    }
}
