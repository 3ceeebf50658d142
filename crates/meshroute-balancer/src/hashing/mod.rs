//! Consistent hashing: rings and request hash functions.

mod request_hash;
mod ring;

pub use request_hash::{hash_key, random_hash, RequestHash, UriRegexHash};
pub use ring::{point_position, points_for_weight, HashRing, OrderedHosts, RingPointCache, RING_MASK};
