//! Key to partition resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Uri;
use md5::{Digest, Md5};
use meshroute_common::error::{PartitionAccessError, Result};
use meshroute_common::keys::DEFAULT_PARTITION_ID;
use meshroute_common::properties::{HashAlgorithm, PartitionProperties};
use regex::Regex;
use tracing::warn;
use xxhash_rust::xxh64::xxh64;

/// A pluggable partitioning function referenced by name from
/// `CUSTOM` cluster partitioning.
pub trait CustomPartitionAccessor: Send + Sync + fmt::Debug {
    fn partition_id(&self, key: &str) -> std::result::Result<i32, PartitionAccessError>;

    /// Defaults to partitioning on the full URI string.
    fn partition_id_for_uri(&self, uri: &Uri) -> std::result::Result<i32, PartitionAccessError> {
        self.partition_id(&uri.to_string())
    }
}

/// Named custom accessors available to cluster configurations.
#[derive(Debug, Clone, Default)]
pub struct PartitionAccessorRegistry {
    accessors: HashMap<String, Arc<dyn CustomPartitionAccessor>>,
}

impl PartitionAccessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        accessor: Arc<dyn CustomPartitionAccessor>,
    ) -> Self {
        self.accessors.insert(name.into(), accessor);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomPartitionAccessor>> {
        self.accessors.get(name).cloned()
    }
}

/// Resolves keys and request URIs to partition ids for one cluster.
#[derive(Debug, Clone)]
pub enum PartitionAccessor {
    /// Unpartitioned: everything is partition 0.
    Default,
    Range(RangeAccessor),
    Hash(HashAccessor),
    Custom(CustomAccessor),
}

#[derive(Debug, Clone)]
pub struct RangeAccessor {
    regex: Regex,
    key_range_start: i64,
    partition_size: i64,
    partition_count: i32,
}

#[derive(Debug, Clone)]
pub struct HashAccessor {
    regex: Regex,
    partition_count: i32,
    algorithm: HashAlgorithm,
}

#[derive(Debug, Clone)]
pub struct CustomAccessor {
    name: String,
    accessor: Arc<dyn CustomPartitionAccessor>,
    max_partition_id: i32,
}

impl PartitionAccessor {
    /// Builds the accessor described by `properties`.
    ///
    /// A `CUSTOM` configuration uses the first of its accessor references
    /// found in `registry`. When none is registered the cluster is treated
    /// as unpartitioned.
    pub fn build(
        properties: &PartitionProperties,
        registry: &PartitionAccessorRegistry,
    ) -> Result<Self> {
        properties.validate()?;
        Ok(match properties {
            PartitionProperties::None => PartitionAccessor::Default,
            PartitionProperties::Range(range) => PartitionAccessor::Range(RangeAccessor {
                regex: Regex::new(&range.key_regex)?,
                key_range_start: range.key_range_start,
                partition_size: range.partition_size,
                partition_count: range.partition_count,
            }),
            PartitionProperties::Hash(hash) => PartitionAccessor::Hash(HashAccessor {
                regex: Regex::new(&hash.key_regex)?,
                partition_count: hash.partition_count,
                algorithm: hash.hash_algorithm,
            }),
            PartitionProperties::Custom(custom) => {
                let found = custom
                    .accessor_refs
                    .iter()
                    .find_map(|name| registry.get(name).map(|accessor| (name, accessor)));
                match found {
                    Some((name, accessor)) => PartitionAccessor::Custom(CustomAccessor {
                        name: name.clone(),
                        accessor,
                        max_partition_id: custom.partition_count - 1,
                    }),
                    None => {
                        warn!(
                            "No registered partition accessor among {:?}, falling back to the default partition",
                            custom.accessor_refs
                        );
                        PartitionAccessor::Default
                    }
                }
            }
        })
    }

    pub fn partition_id(&self, key: &str) -> std::result::Result<i32, PartitionAccessError> {
        match self {
            PartitionAccessor::Default => Ok(DEFAULT_PARTITION_ID),
            PartitionAccessor::Range(range) => range.partition_id(key),
            PartitionAccessor::Hash(hash) => hash.partition_id(key),
            PartitionAccessor::Custom(custom) => {
                custom.check(custom.accessor.partition_id(key)?)
            }
        }
    }

    /// Partitions a request URI by its query string, or its path when it has
    /// no query.
    pub fn partition_id_for_uri(&self, uri: &Uri) -> std::result::Result<i32, PartitionAccessError> {
        match self {
            PartitionAccessor::Default => Ok(DEFAULT_PARTITION_ID),
            PartitionAccessor::Custom(custom) => {
                custom.check(custom.accessor.partition_id_for_uri(uri)?)
            }
            _ => self.partition_id(uri.query().unwrap_or_else(|| uri.path())),
        }
    }

    pub fn max_partition_id(&self) -> i32 {
        match self {
            PartitionAccessor::Default => DEFAULT_PARTITION_ID,
            PartitionAccessor::Range(range) => range.partition_count - 1,
            PartitionAccessor::Hash(hash) => hash.partition_count - 1,
            PartitionAccessor::Custom(custom) => custom.max_partition_id,
        }
    }
}

fn capture<'a>(regex: &Regex, input: &'a str) -> std::result::Result<&'a str, PartitionAccessError> {
    regex
        .captures(input)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| PartitionAccessError::NoMatch(input.to_string()))
}

fn parse_numeric(raw: &str) -> std::result::Result<i64, PartitionAccessError> {
    raw.parse::<i64>()
        .map_err(|_| PartitionAccessError::NotNumeric(raw.to_string()))
}

impl RangeAccessor {
    fn partition_id(&self, key: &str) -> std::result::Result<i32, PartitionAccessError> {
        let id = parse_numeric(capture(&self.regex, key)?)?;
        let out_of_range = || PartitionAccessError::OutOfRange {
            key: id,
            start: self.key_range_start,
            count: self.partition_count,
        };

        if id < self.key_range_start {
            return Err(out_of_range());
        }
        let offset = id.checked_sub(self.key_range_start).ok_or_else(out_of_range)?;
        let partition = offset / self.partition_size;
        if partition >= i64::from(self.partition_count) {
            return Err(out_of_range());
        }
        Ok(partition as i32)
    }
}

impl HashAccessor {
    fn partition_id(&self, key: &str) -> std::result::Result<i32, PartitionAccessError> {
        let raw = capture(&self.regex, key)?;
        let count = self.partition_count as u64;
        let partition = match self.algorithm {
            HashAlgorithm::Modulo => {
                return Ok(parse_numeric(raw)?.rem_euclid(i64::from(self.partition_count)) as i32)
            }
            HashAlgorithm::Md5 => md5_prefix(raw) % count,
            HashAlgorithm::XxHash => xxh64(raw.as_bytes(), 0) % count,
        };
        Ok(partition as i32)
    }
}

/// First eight digest bytes, big-endian.
fn md5_prefix(raw: &str) -> u64 {
    let digest = Md5::digest(raw.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

impl CustomAccessor {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, partition_id: i32) -> std::result::Result<i32, PartitionAccessError> {
        if partition_id < 0 || partition_id > self.max_partition_id {
            return Err(PartitionAccessError::InvalidPartitionId {
                partition_id,
                max_partition_id: self.max_partition_id,
            });
        }
        Ok(partition_id)
    }
}
