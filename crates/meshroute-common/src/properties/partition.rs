use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{self, PropertyMap};
use crate::error::{Result, RouteError};
use crate::keys;

/// How a cluster splits its key space into partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "partitionType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionProperties {
    /// A single implicit partition 0.
    #[default]
    None,
    Range(RangePartition),
    Hash(HashPartition),
    Custom(CustomPartition),
}

/// Contiguous numeric key ranges of a fixed size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangePartition {
    #[serde(rename = "partitionKeyRegex")]
    pub key_regex: String,
    pub key_range_start: i64,
    pub partition_size: i64,
    pub partition_count: i32,
}

/// Hash of the extracted key modulo the partition count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashPartition {
    #[serde(rename = "partitionKeyRegex")]
    pub key_regex: String,
    pub partition_count: i32,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HashAlgorithm {
    /// Numeric keys only; the key itself modulo the partition count.
    #[default]
    Modulo,
    Md5,
    #[serde(rename = "XXHASH")]
    XxHash,
}

/// Partitioning delegated to named, registered accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPartition {
    pub partition_count: i32,
    #[serde(rename = "partitionAccessorList", default)]
    pub accessor_refs: Vec<String>,
}

impl PartitionProperties {
    /// Highest partition id this configuration can produce.
    pub fn max_partition_id(&self) -> i32 {
        match self {
            PartitionProperties::None => keys::DEFAULT_PARTITION_ID,
            PartitionProperties::Range(range) => range.partition_count - 1,
            PartitionProperties::Hash(hash) => hash.partition_count - 1,
            PartitionProperties::Custom(custom) => custom.partition_count - 1,
        }
    }

    /// Checks counts, sizes and regexes without building an accessor.
    pub fn validate(&self) -> Result<()> {
        match self {
            PartitionProperties::None => Ok(()),
            PartitionProperties::Range(range) => {
                check_count(range.partition_count)?;
                if range.partition_size <= 0 {
                    return Err(RouteError::malformed(
                        keys::PARTITION_SIZE,
                        format!("partition size must be positive, got {}", range.partition_size),
                    ));
                }
                check_regex(&range.key_regex)
            }
            PartitionProperties::Hash(hash) => {
                check_count(hash.partition_count)?;
                check_regex(&hash.key_regex)
            }
            PartitionProperties::Custom(custom) => check_count(custom.partition_count),
        }
    }

    /// Builds partition properties from the flat map form.
    ///
    /// A map without `partitionType` describes an unpartitioned cluster.
    pub fn from_map(map: &PropertyMap) -> Result<Self> {
        let Some(kind) = map.get(keys::PARTITION_TYPE) else {
            return Ok(PartitionProperties::None);
        };

        let properties = match kind.trim().to_ascii_uppercase().as_str() {
            "NONE" => PartitionProperties::None,
            "RANGE" => PartitionProperties::Range(RangePartition {
                key_regex: required(map, keys::PARTITION_KEY_REGEX)?,
                key_range_start: config::get_or(map, keys::KEY_RANGE_START, 0)?,
                partition_size: required_parsed(map, keys::PARTITION_SIZE)?,
                partition_count: required_parsed(map, keys::PARTITION_COUNT)?,
            }),
            "HASH" => {
                let hash_algorithm = match map.get(keys::HASH_ALGORITHM) {
                    None => HashAlgorithm::default(),
                    Some(raw) => parse_algorithm(raw)?,
                };
                PartitionProperties::Hash(HashPartition {
                    key_regex: required(map, keys::PARTITION_KEY_REGEX)?,
                    partition_count: required_parsed(map, keys::PARTITION_COUNT)?,
                    hash_algorithm,
                })
            }
            "CUSTOM" => PartitionProperties::Custom(CustomPartition {
                partition_count: config::get_or(map, keys::PARTITION_COUNT, 1)?,
                accessor_refs: config::get_list(map, keys::PARTITION_ACCESSOR_LIST)?
                    .unwrap_or_default(),
            }),
            other => {
                return Err(RouteError::malformed(
                    keys::PARTITION_TYPE,
                    format!("unknown partition type '{}'", other),
                ))
            }
        };

        properties.validate()?;
        Ok(properties)
    }
}

fn parse_algorithm(raw: &str) -> Result<HashAlgorithm> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "MODULO" => Ok(HashAlgorithm::Modulo),
        "MD5" => Ok(HashAlgorithm::Md5),
        "XXHASH" => Ok(HashAlgorithm::XxHash),
        other => Err(RouteError::malformed(
            keys::HASH_ALGORITHM,
            format!("unknown hash algorithm '{}'", other),
        )),
    }
}

fn required(map: &PropertyMap, key: &str) -> Result<String> {
    map.get(key)
        .cloned()
        .ok_or_else(|| RouteError::malformed(key, "required key is missing"))
}

fn required_parsed<T>(map: &PropertyMap, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    config::get_parsed(map, key)?.ok_or_else(|| RouteError::malformed(key, "required key is missing"))
}

fn check_count(count: i32) -> Result<()> {
    if count <= 0 {
        return Err(RouteError::malformed(
            keys::PARTITION_COUNT,
            format!("partition count must be positive, got {}", count),
        ));
    }
    Ok(())
}

fn check_regex(pattern: &str) -> Result<()> {
    let regex = Regex::new(pattern)
        .map_err(|e| RouteError::malformed(keys::PARTITION_KEY_REGEX, e.to_string()))?;
    if regex.captures_len() < 2 {
        return Err(RouteError::malformed(
            keys::PARTITION_KEY_REGEX,
            format!("'{}' has no capture group", pattern),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> PropertyMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_json_range_round_trip_shape() {
        let json = r#"{
            "partitionType": "RANGE",
            "partitionKeyRegex": "id=(\\d+)",
            "keyRangeStart": 0,
            "partitionSize": 100,
            "partitionCount": 10
        }"#;
        let props: PartitionProperties = serde_json::from_str(json).unwrap();
        assert_eq!(props.max_partition_id(), 9);
        props.validate().unwrap();
    }

    #[test]
    fn test_json_hash_defaults_to_modulo() {
        let json = r#"{"partitionType": "HASH", "partitionKeyRegex": "(\\w+)", "partitionCount": 4}"#;
        let props: PartitionProperties = serde_json::from_str(json).unwrap();
        match props {
            PartitionProperties::Hash(hash) => assert_eq!(hash.hash_algorithm, HashAlgorithm::Modulo),
            other => panic!("expected hash partitioning, got {:?}", other),
        }
    }

    #[test]
    fn test_json_none() {
        let props: PartitionProperties = serde_json::from_str(r#"{"partitionType": "NONE"}"#).unwrap();
        assert_eq!(props, PartitionProperties::None);
        assert_eq!(props.max_partition_id(), 0);
    }

    #[test]
    fn test_from_map_without_type_is_unpartitioned() {
        assert_eq!(
            PartitionProperties::from_map(&PropertyMap::new()).unwrap(),
            PartitionProperties::None
        );
    }

    #[test]
    fn test_from_map_hash_xxhash() {
        let props = PartitionProperties::from_map(&map(&[
            ("partitionType", "HASH"),
            ("partitionKeyRegex", "key=(\\w+)"),
            ("partitionCount", "8"),
            ("hashAlgorithm", "xxhash"),
        ]))
        .unwrap();
        assert_eq!(
            props,
            PartitionProperties::Hash(HashPartition {
                key_regex: "key=(\\w+)".into(),
                partition_count: 8,
                hash_algorithm: HashAlgorithm::XxHash,
            })
        );
    }

    #[test]
    fn test_from_map_custom_accessor_list() {
        let props = PartitionProperties::from_map(&map(&[
            ("partitionType", "CUSTOM"),
            ("partitionCount", "3"),
            ("partitionAccessorList", r#"["byRegion", "fallback"]"#),
        ]))
        .unwrap();
        match props {
            PartitionProperties::Custom(custom) => {
                assert_eq!(custom.accessor_refs, vec!["byRegion", "fallback"]);
                assert_eq!(custom.partition_count, 3);
            }
            other => panic!("expected custom partitioning, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_partition_count_is_rejected() {
        let result = PartitionProperties::from_map(&map(&[
            ("partitionType", "RANGE"),
            ("partitionKeyRegex", "(\\d+)"),
            ("partitionSize", "10"),
            ("partitionCount", "0"),
        ]));
        assert!(matches!(result, Err(RouteError::MalformedProperty { .. })));
    }

    #[test]
    fn test_regex_without_group_is_rejected() {
        let props = PartitionProperties::Hash(HashPartition {
            key_regex: "\\d+".into(),
            partition_count: 2,
            hash_algorithm: HashAlgorithm::Md5,
        });
        assert!(props.validate().is_err());
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let result = PartitionProperties::from_map(&map(&[
            ("partitionType", "HASH"),
            ("partitionKeyRegex", "(unclosed"),
            ("partitionCount", "2"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = PartitionProperties::from_map(&map(&[("partitionType", "ROUND_ROBIN")]));
        assert!(result.is_err());
    }
}
