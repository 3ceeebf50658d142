use thiserror::Error;

/// Reason a key (or request URI) could not be assigned to a partition.
///
/// These are per-key failures: mapping APIs report them inside their
/// results instead of failing the whole call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionAccessError {
    #[error("partition key regex did not match '{0}'")]
    NoMatch(String),

    #[error("partition key '{0}' is not numeric")]
    NotNumeric(String),

    #[error("partition key {key} is outside the configured range (start {start}, {count} partitions)")]
    OutOfRange { key: i64, start: i64, count: i32 },

    #[error("custom accessor returned partition {partition_id}, max is {max_partition_id}")]
    InvalidPartitionId {
        partition_id: i32,
        max_partition_id: i32,
    },
}

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Partition access error: {0}")]
    Partition(#[from] PartitionAccessError),

    #[error("Malformed property '{name}': {reason}")]
    MalformedProperty { name: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Load balancer state has been shut down")]
    ShutDown,

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouteError {
    /// Shorthand for a [`RouteError::MalformedProperty`].
    pub fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        RouteError::MalformedProperty {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<regex::Error> for RouteError {
    fn from(err: regex::Error) -> Self {
        RouteError::malformed("regex", err.to_string())
    }
}

impl From<http::uri::InvalidUri> for RouteError {
    fn from(err: http::uri::InvalidUri) -> Self {
        RouteError::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RouteError>;
