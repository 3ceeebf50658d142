use std::time::Duration;

use meshroute_common::config::{self, PropertyMap};
use meshroute_common::error::{Result, RouteError};
use meshroute_common::keys;
use meshroute_metrics::CallStats;

use crate::strategy::StrategyConfig;

/// Latency statistic compared against the latency thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LatencyToUse {
    #[default]
    Average,
    Pct50,
    Pct90,
    Pct95,
    Pct99,
}

impl LatencyToUse {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AVERAGE" => Ok(LatencyToUse::Average),
            "PCT50" => Ok(LatencyToUse::Pct50),
            "PCT90" => Ok(LatencyToUse::Pct90),
            "PCT95" => Ok(LatencyToUse::Pct95),
            "PCT99" => Ok(LatencyToUse::Pct99),
            other => Err(RouteError::malformed(
                keys::DEGRADER_LATENCY_TO_USE,
                format!("unknown latency statistic '{}'", other),
            )),
        }
    }

    /// The selected statistic of `stats`, in milliseconds.
    pub fn select(self, stats: &CallStats) -> f64 {
        let latency = &stats.latency;
        match self {
            LatencyToUse::Average => latency.average_ms,
            LatencyToUse::Pct50 => latency.p50_ms,
            LatencyToUse::Pct90 => latency.p90_ms,
            LatencyToUse::Pct95 => latency.p95_ms,
            LatencyToUse::Pct99 => latency.p99_ms,
        }
    }
}

/// Per-host degrader tuning read from `degrader.*` keys.
#[derive(Debug, Clone, PartialEq)]
pub struct DegraderConfig {
    pub log_enabled: bool,
    pub latency_to_use: LatencyToUse,
    /// Largest fraction of a host's weight that may be taken away.
    pub max_drop_rate: f64,
    pub max_drop_duration: Duration,
    /// Drop-rate increase per unhealthy interval.
    pub up_step: f64,
    /// Drop-rate decrease per healthy interval.
    pub down_step: f64,
    pub min_call_count: u64,
    pub high_latency: Duration,
    pub low_latency: Duration,
    pub high_error_rate: f64,
    pub low_error_rate: f64,
}

impl Default for DegraderConfig {
    fn default() -> Self {
        Self {
            log_enabled: false,
            latency_to_use: LatencyToUse::Average,
            max_drop_rate: 1.0,
            max_drop_duration: Duration::from_millis(60_000),
            up_step: 0.2,
            down_step: 0.2,
            min_call_count: 10,
            high_latency: Duration::from_millis(3000),
            low_latency: Duration::from_millis(500),
            high_error_rate: 1.1,
            low_error_rate: 1.1,
        }
    }
}

impl DegraderConfig {
    pub fn from_map(map: &PropertyMap) -> Result<Self> {
        let defaults = Self::default();
        let latency_to_use = match map.get(keys::DEGRADER_LATENCY_TO_USE) {
            None => defaults.latency_to_use,
            Some(raw) => LatencyToUse::parse(raw)?,
        };

        let config = Self {
            log_enabled: config::get_bool(map, keys::DEGRADER_LOG_ENABLED, defaults.log_enabled)?,
            latency_to_use,
            max_drop_rate: config::get_f64_in(map, keys::DEGRADER_MAX_DROP_RATE, defaults.max_drop_rate, 0.0, 1.0)?,
            max_drop_duration: config::get_duration_ms(
                map,
                keys::DEGRADER_MAX_DROP_DURATION,
                defaults.max_drop_duration,
            )?,
            up_step: config::get_f64_in(map, keys::DEGRADER_UP_STEP, defaults.up_step, 0.0, 1.0)?,
            down_step: config::get_f64_in(map, keys::DEGRADER_DOWN_STEP, defaults.down_step, 0.0, 1.0)?,
            min_call_count: config::get_or(map, keys::DEGRADER_MIN_CALL_COUNT, defaults.min_call_count)?,
            high_latency: config::get_duration_ms(map, keys::DEGRADER_HIGH_LATENCY, defaults.high_latency)?,
            low_latency: config::get_duration_ms(map, keys::DEGRADER_LOW_LATENCY, defaults.low_latency)?,
            high_error_rate: config::get_or(map, keys::DEGRADER_HIGH_ERROR_RATE, defaults.high_error_rate)?,
            low_error_rate: config::get_or(map, keys::DEGRADER_LOW_ERROR_RATE, defaults.low_error_rate)?,
        };

        if config.low_latency > config.high_latency {
            return Err(RouteError::malformed(
                keys::DEGRADER_LOW_LATENCY,
                format!("{:?} is above the high latency {:?}", config.low_latency, config.high_latency),
            ));
        }
        if config.low_error_rate > config.high_error_rate {
            return Err(RouteError::malformed(
                keys::DEGRADER_LOW_ERROR_RATE,
                format!("{} is above the high error rate {}", config.low_error_rate, config.high_error_rate),
            ));
        }
        Ok(config)
    }
}

/// Controller thresholds after merging strategy and degrader configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DegraderSettings {
    pub log_enabled: bool,
    pub latency_to_use: LatencyToUse,
    /// Lowest weight multiplier, `1 - max_drop_rate`.
    pub floor: f64,
    pub max_drop_duration: Duration,
    pub high_latency_ms: f64,
    pub low_latency_ms: f64,
    pub high_error_rate: f64,
    pub low_error_rate: f64,
    pub step_up: f64,
    pub step_down: f64,
    pub min_calls_high: u64,
    pub min_calls_low: u64,
    pub initial_recovery_level: f64,
    pub ramp_factor: f64,
    /// Average cluster latency at which calls start being dropped.
    pub high_water_mark_ms: f64,
    /// Average cluster latency at which dropping eases off.
    pub low_water_mark_ms: f64,
}

impl DegraderSettings {
    /// Strategy-level values win. Otherwise the weight steps come from the
    /// degrader's drop-rate steps (a weight step down is a drop-rate step up)
    /// and the call count water marks from `degrader.minCallCount`, halved
    /// for the low mark.
    pub fn resolve(strategy: &StrategyConfig, degrader: &DegraderConfig) -> Self {
        let min_calls_high = strategy
            .min_call_count_high_water_mark
            .unwrap_or(degrader.min_call_count);
        let min_calls_low = strategy
            .min_call_count_low_water_mark
            .unwrap_or((degrader.min_call_count / 2).max(1))
            .min(min_calls_high);

        Self {
            log_enabled: degrader.log_enabled,
            latency_to_use: degrader.latency_to_use,
            floor: 1.0 - degrader.max_drop_rate,
            max_drop_duration: degrader.max_drop_duration,
            high_latency_ms: degrader.high_latency.as_secs_f64() * 1000.0,
            low_latency_ms: degrader.low_latency.as_secs_f64() * 1000.0,
            high_error_rate: degrader.high_error_rate,
            low_error_rate: degrader.low_error_rate,
            step_up: strategy.global_step_up.unwrap_or(degrader.down_step),
            step_down: strategy.global_step_down.unwrap_or(degrader.up_step),
            min_calls_high,
            min_calls_low,
            initial_recovery_level: strategy.initial_recovery_level,
            ramp_factor: strategy.ring_ramp_factor,
            high_water_mark_ms: strategy.high_water_mark,
            low_water_mark_ms: strategy.low_water_mark,
        }
    }

    /// Highest fraction of calls cluster-wide dropping may shed.
    pub fn max_drop_rate(&self) -> f64 {
        1.0 - self.floor
    }

    /// Weight a host restarts from: the recovery level, never below the floor.
    pub fn recovery_weight(&self) -> f64 {
        self.initial_recovery_level.max(self.floor)
    }
}

impl Default for DegraderSettings {
    fn default() -> Self {
        Self::resolve(&StrategyConfig::default(), &DegraderConfig::default())
    }
}
