//! meshroute Common Types
//!
//! This crate provides the property model, error taxonomy and configuration
//! helpers shared by every meshroute component.
//!
//! # Overview
//!
//! meshroute resolves a logical service name (and optionally a routing key)
//! to the concrete endpoints that should serve a request, entirely on the
//! client side. Everything it knows about the world arrives as three kinds
//! of immutable snapshots pushed by an external property feed:
//!
//! - **Cluster properties**: prioritized schemes, partitioning, banned hosts
//! - **Service properties**: owning cluster, strategy list and tuning maps
//! - **URI properties**: the live hosts of a cluster and their weights
//!
//! # Components
//!
//! - [`properties`] - Snapshot types and [`VersionedProperty`]
//! - [`event`] - Property feed events and payload decoding
//! - [`config`] - Coercion helpers for flat string maps
//! - [`keys`] - Well-known property map keys
//! - [`error`] - [`RouteError`] and [`PartitionAccessError`]
//!
//! # Example
//!
//! ```
//! use meshroute_common::{PropertyKind, PropertyValue};
//!
//! let value = PropertyValue::from_json(
//!     PropertyKind::Cluster,
//!     r#"{"clusterName": "articles-cluster", "prioritizedSchemes": ["https", "http"]}"#,
//! )
//! .unwrap();
//! assert_eq!(value.name(), "articles-cluster");
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod keys;
pub mod properties;
pub mod uri;

pub use config::PropertyMap;
pub use error::{PartitionAccessError, Result, RouteError};
pub use event::{PropertyEvent, PropertyKind, PropertyOp, PropertyValue};
pub use properties::{
    ClusterProperties, CustomPartition, HashAlgorithm, HashPartition, PartitionData,
    PartitionProperties, RangePartition, ServiceProperties, UriProperties, VersionedProperty,
};
