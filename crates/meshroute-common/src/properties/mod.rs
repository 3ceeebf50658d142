//! Immutable property snapshots published by the property feed.

mod cluster;
mod partition;
mod service;
mod uris;
mod versioned;

pub use cluster::ClusterProperties;
pub use partition::{
    CustomPartition, HashAlgorithm, HashPartition, PartitionProperties, RangePartition,
};
pub use service::ServiceProperties;
pub use uris::{PartitionData, UriProperties};
pub use versioned::{next_version, VersionedProperty};
