use std::time::Duration;

use meshroute_common::config::{self, PropertyMap};
use meshroute_common::error::{Result, RouteError};
use meshroute_common::keys;

use crate::hashing::{RequestHash, UriRegexHash};

/// How requests choose their ring starting point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HashMethod {
    /// Random point per request.
    #[default]
    None,
    /// Sticky routing on capture groups of the first matching regex.
    UriRegex(Vec<String>),
}

impl HashMethod {
    pub fn request_hash(&self) -> Result<RequestHash> {
        match self {
            HashMethod::None => Ok(RequestHash::Random),
            HashMethod::UriRegex(patterns) => Ok(RequestHash::UriRegex(UriRegexHash::new(patterns)?)),
        }
    }
}

/// Strategy tuning read from `http.loadBalancer.*` keys.
///
/// Optional fields fall back to the service's degrader configuration when
/// unset; see `DegraderSettings::resolve`.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    pub update_interval: Duration,
    pub points_per_weight: u32,
    /// Weight multiplier a host restarts from after a full drop or when it
    /// joins a live partition.
    pub initial_recovery_level: f64,
    /// Geometric growth per healthy interval while recovering.
    pub ring_ramp_factor: f64,
    pub global_step_up: Option<f64>,
    pub global_step_down: Option<f64>,
    pub min_call_count_high_water_mark: Option<u64>,
    pub min_call_count_low_water_mark: Option<u64>,
    /// Cluster latency water marks in milliseconds.
    pub high_water_mark: f64,
    pub low_water_mark: f64,
    pub hash_method: HashMethod,
    pub hashring_point_cleanup_rate: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(5000),
            points_per_weight: 100,
            initial_recovery_level: 0.01,
            ring_ramp_factor: 2.0,
            global_step_up: None,
            global_step_down: None,
            min_call_count_high_water_mark: None,
            min_call_count_low_water_mark: None,
            high_water_mark: 600.0,
            low_water_mark: 200.0,
            hash_method: HashMethod::None,
            hashring_point_cleanup_rate: 0.2,
        }
    }
}

impl StrategyConfig {
    pub fn from_map(map: &PropertyMap) -> Result<Self> {
        let defaults = Self::default();

        let hash_method = match map.get(keys::HASH_METHOD).map(|m| m.trim()) {
            None | Some(keys::HASH_METHOD_NONE) | Some("") => HashMethod::None,
            Some(keys::HASH_METHOD_URI_REGEX) => HashMethod::UriRegex(
                config::get_list(map, keys::HASH_CONFIG_REGEXES)?.unwrap_or_default(),
            ),
            Some(other) => {
                return Err(RouteError::malformed(
                    keys::HASH_METHOD,
                    format!("unknown hash method '{}'", other),
                ))
            }
        };

        let config = Self {
            update_interval: config::get_duration_ms(map, keys::UPDATE_INTERVAL_MS, defaults.update_interval)?,
            points_per_weight: config::get_or(map, keys::POINTS_PER_WEIGHT, defaults.points_per_weight)?,
            initial_recovery_level: config::get_f64_in(
                map,
                keys::INITIAL_RECOVERY_LEVEL,
                defaults.initial_recovery_level,
                0.0,
                1.0,
            )?,
            ring_ramp_factor: config::get_or(map, keys::RING_RAMP_FACTOR, defaults.ring_ramp_factor)?,
            global_step_up: step(map, keys::GLOBAL_STEP_UP)?,
            global_step_down: step(map, keys::GLOBAL_STEP_DOWN)?,
            min_call_count_high_water_mark: config::get_parsed(map, keys::CLUSTER_MIN_CALL_COUNT_HIGH_WATER_MARK)?,
            min_call_count_low_water_mark: config::get_parsed(map, keys::CLUSTER_MIN_CALL_COUNT_LOW_WATER_MARK)?,
            high_water_mark: config::get_or(map, keys::HIGH_WATER_MARK, defaults.high_water_mark)?,
            low_water_mark: config::get_or(map, keys::LOW_WATER_MARK, defaults.low_water_mark)?,
            hash_method,
            hashring_point_cleanup_rate: config::get_f64_in(
                map,
                keys::HASHRING_POINT_CLEANUP_RATE,
                defaults.hashring_point_cleanup_rate,
                0.0,
                1.0,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.update_interval.is_zero() {
            return Err(RouteError::malformed(keys::UPDATE_INTERVAL_MS, "update interval must be positive"));
        }
        if self.points_per_weight == 0 {
            return Err(RouteError::malformed(keys::POINTS_PER_WEIGHT, "points per weight must be positive"));
        }
        if self.ring_ramp_factor.is_nan() || self.ring_ramp_factor <= 1.0 {
            return Err(RouteError::malformed(
                keys::RING_RAMP_FACTOR,
                format!("ramp factor {} must be above 1", self.ring_ramp_factor),
            ));
        }
        if self.initial_recovery_level <= 0.0 {
            return Err(RouteError::malformed(
                keys::INITIAL_RECOVERY_LEVEL,
                format!("recovery level {} must be positive", self.initial_recovery_level),
            ));
        }
        if self.low_water_mark > self.high_water_mark {
            return Err(RouteError::malformed(
                keys::LOW_WATER_MARK,
                format!("{} is above the high water mark {}", self.low_water_mark, self.high_water_mark),
            ));
        }
        if let (Some(low), Some(high)) = (self.min_call_count_low_water_mark, self.min_call_count_high_water_mark) {
            if low > high {
                return Err(RouteError::malformed(
                    keys::CLUSTER_MIN_CALL_COUNT_LOW_WATER_MARK,
                    format!("{} is above the high water mark {}", low, high),
                ));
            }
        }
        if let HashMethod::UriRegex(patterns) = &self.hash_method {
            if patterns.is_empty() {
                return Err(RouteError::malformed(keys::HASH_CONFIG_REGEXES, "uriRegex hashing needs at least one regex"));
            }
            self.hash_method.request_hash()?;
        }
        Ok(())
    }
}

fn step(map: &PropertyMap, key: &str) -> Result<Option<f64>> {
    let value = config::get_parsed::<f64>(map, key)?;
    if let Some(v) = value {
        if !(v > 0.0 && v <= 1.0) {
            return Err(RouteError::malformed(key, format!("step {} is outside (0, 1]", v)));
        }
    }
    Ok(value)
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
    fn test_defaults_from_empty_map() {
        let config = StrategyConfig::from_map(&PropertyMap::new()).unwrap();
        assert_eq!(config, StrategyConfig::default());
        assert_eq!(config.update_interval, Duration::from_secs(5));
        assert_eq!(config.points_per_weight, 100);
    }

    #[test]
    fn test_overrides() {
        let config = StrategyConfig::from_map(&map(&[
            ("http.loadBalancer.updateIntervalMs", "1000"),
            ("http.loadBalancer.pointsPerWeight", "50"),
            ("http.loadBalancer.globalStepDown", "0.5"),
            ("http.loadBalancer.clusterMinCallCount.highWaterMark", "20"),
        ]))
        .unwrap();

        assert_eq!(config.update_interval, Duration::from_secs(1));
        assert_eq!(config.points_per_weight, 50);
        assert_eq!(config.global_step_down, Some(0.5));
        assert_eq!(config.global_step_up, None);
        assert_eq!(config.min_call_count_high_water_mark, Some(20));
    }

    #[test]
    fn test_uri_regex_hash_method() {
        let config = StrategyConfig::from_map(&map(&[
            ("http.loadBalancer.hashMethod", "uriRegex"),
            ("http.loadBalancer.hashConfig.regexes", r#"["/members/(\\d+)"]"#),
        ]))
        .unwrap();

        assert_eq!(config.hash_method, HashMethod::UriRegex(vec!["/members/(\\d+)".into()]));
        assert!(config.hash_method.request_hash().unwrap().is_sticky());
    }

    #[test]
    fn test_uri_regex_without_regexes_is_rejected() {
        let result = StrategyConfig::from_map(&map(&[("http.loadBalancer.hashMethod", "uriRegex")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_hash_method_is_rejected() {
        let result = StrategyConfig::from_map(&map(&[("http.loadBalancer.hashMethod", "md5")]));
        assert!(matches!(result, Err(RouteError::MalformedProperty { .. })));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (key, value) in [
            ("http.loadBalancer.updateIntervalMs", "0"),
            ("http.loadBalancer.pointsPerWeight", "-1"),
            ("http.loadBalancer.ringRampFactor", "0.5"),
            ("http.loadBalancer.globalStepUp", "0"),
            ("http.loadBalancer.initialRecoveryLevel", "2"),
            ("http.loadBalancer.lowWaterMark", "900"),
        ] {
            assert!(StrategyConfig::from_map(&map(&[(key, value)])).is_err(), "{} = {}", key, value);
        }
    }

    #[test]
    fn test_recovery_settings_that_never_recover_are_rejected() {
        // A flat ramp or a zero restart level would pin a recovering host
        // at its restart weight forever.
        for (key, value) in [
            ("http.loadBalancer.ringRampFactor", "1"),
            ("http.loadBalancer.ringRampFactor", "1.0"),
            ("http.loadBalancer.initialRecoveryLevel", "0"),
            ("http.loadBalancer.initialRecoveryLevel", "0.0"),
        ] {
            let result = StrategyConfig::from_map(&map(&[(key, value)]));
            assert!(
                matches!(result, Err(RouteError::MalformedProperty { .. })),
                "{} = {}",
                key,
                value
            );
        }

        let config = StrategyConfig::from_map(&map(&[
            ("http.loadBalancer.ringRampFactor", "1.5"),
            ("http.loadBalancer.initialRecoveryLevel", "0.05"),
        ]))
        .unwrap();
        assert_eq!(config.ring_ramp_factor, 1.5);
        assert_eq!(config.initial_recovery_level, 0.05);
    }
}
