//! Client-side routing for meshroute: partitioning, consistent-hash rings,
//! health-adaptive weights and the state that keeps them current.

pub mod balancer;
pub mod context;
pub mod degrader;
pub mod hashing;
pub mod key_mapper;
pub mod partition;
pub mod state;
pub mod strategy;
pub mod uri_mapper;

#[cfg(test)]
mod testing;

pub use balancer::{ResolvedEndpoint, SimpleLoadBalancer};
pub use context::RequestContext;
pub use degrader::{DegraderConfig, DegraderController, DegraderPhase, DegraderScheduler};
pub use hashing::{HashRing, RequestHash};
pub use key_mapper::{HostToKeyMapper, KeyMapper, KeysAndHosts, MapKeyResult, UnmappedKey, UnmappedReason};
pub use partition::{CustomPartitionAccessor, PartitionAccessor, PartitionAccessorRegistry};
pub use state::{
    ClusterGeneration, LoadBalancerState, LoadBalancerStateBuilder, LoadBalancerStateConfig,
    NullSubscriber, PropertySender, PropertySubscriber, ServiceRoute,
};
pub use strategy::{LoadBalancerStrategy, StrategyConfig, StrategyKind, StrategyRegistry};
pub use uri_mapper::{UriKeyPair, UriMapper, UriMappingResult, PARTITION_NOT_FOUND};
