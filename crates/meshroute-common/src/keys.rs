//! Well-known keys of the flat property maps exchanged with the property store.

// Degrader tuning, read from `ServiceProperties::degrader_properties`.
pub const DEGRADER_LOG_ENABLED: &str = "degrader.logEnabled";
pub const DEGRADER_LATENCY_TO_USE: &str = "degrader.latencyToUse";
pub const DEGRADER_MAX_DROP_RATE: &str = "degrader.maxDropRate";
pub const DEGRADER_MAX_DROP_DURATION: &str = "degrader.maxDropDuration";
pub const DEGRADER_UP_STEP: &str = "degrader.upStep";
pub const DEGRADER_DOWN_STEP: &str = "degrader.downStep";
pub const DEGRADER_MIN_CALL_COUNT: &str = "degrader.minCallCount";
pub const DEGRADER_HIGH_LATENCY: &str = "degrader.highLatency";
pub const DEGRADER_LOW_LATENCY: &str = "degrader.lowLatency";
pub const DEGRADER_HIGH_ERROR_RATE: &str = "degrader.highErrorRate";
pub const DEGRADER_LOW_ERROR_RATE: &str = "degrader.lowErrorRate";

// Strategy tuning, read from `ServiceProperties::load_balancer_strategy_properties`.
pub const HASH_METHOD: &str = "http.loadBalancer.hashMethod";
pub const HASH_CONFIG_REGEXES: &str = "http.loadBalancer.hashConfig.regexes";
pub const UPDATE_INTERVAL_MS: &str = "http.loadBalancer.updateIntervalMs";
pub const POINTS_PER_WEIGHT: &str = "http.loadBalancer.pointsPerWeight";
pub const LOW_WATER_MARK: &str = "http.loadBalancer.lowWaterMark";
pub const HIGH_WATER_MARK: &str = "http.loadBalancer.highWaterMark";
pub const INITIAL_RECOVERY_LEVEL: &str = "http.loadBalancer.initialRecoveryLevel";
pub const RING_RAMP_FACTOR: &str = "http.loadBalancer.ringRampFactor";
pub const GLOBAL_STEP_UP: &str = "http.loadBalancer.globalStepUp";
pub const GLOBAL_STEP_DOWN: &str = "http.loadBalancer.globalStepDown";
pub const CLUSTER_MIN_CALL_COUNT_HIGH_WATER_MARK: &str =
    "http.loadBalancer.clusterMinCallCount.highWaterMark";
pub const CLUSTER_MIN_CALL_COUNT_LOW_WATER_MARK: &str =
    "http.loadBalancer.clusterMinCallCount.lowWaterMark";
pub const HASHRING_POINT_CLEANUP_RATE: &str = "http.loadBalancer.hashRingPointCleanupRate";

pub const HASH_METHOD_NONE: &str = "none";
pub const HASH_METHOD_URI_REGEX: &str = "uriRegex";

// Partition description, read from `ClusterProperties::properties` when a
// cluster is described by a flat map instead of structured JSON.
pub const PARTITION_TYPE: &str = "partitionType";
pub const PARTITION_KEY_REGEX: &str = "partitionKeyRegex";
pub const KEY_RANGE_START: &str = "keyRangeStart";
pub const PARTITION_SIZE: &str = "partitionSize";
pub const PARTITION_COUNT: &str = "partitionCount";
pub const HASH_ALGORITHM: &str = "hashAlgorithm";
pub const PARTITION_ACCESSOR_LIST: &str = "partitionAccessorList";

/// Partition id used by unpartitioned clusters.
pub const DEFAULT_PARTITION_ID: i32 = 0;
