use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use http::Uri;
use parking_lot::Mutex;
use tracing::trace;

use crate::hashing::{HashRing, RingPointCache};

// Past this many changed hosts a fresh build beats repeated merges.
const INCREMENTAL_HOST_LIMIT: usize = 4;

/// A published ring and the inputs it was built from.
#[derive(Debug)]
pub(crate) struct PartitionRing {
    pub generation: u64,
    pub epoch: u64,
    pub points: HashMap<Uri, u32>,
    pub ring: Arc<HashRing>,
}

#[derive(Debug, Default)]
struct PartitionSlot {
    current: ArcSwapOption<PartitionRing>,
    cache: Mutex<RingPointCache>,
}

/// Inputs handed to the point function of [`RingSlots::ring`].
pub(crate) struct RingBuild<'a> {
    /// Ring currently published for the partition, if any.
    pub previous: Option<&'a PartitionRing>,
    /// The result will be published. False when the caller reads an older
    /// generation than the published one.
    pub publish: bool,
}

/// Copy-on-write ring cells, one per partition.
///
/// Readers load the published ring without locking. A reader that finds
/// the ring out of date (a different cluster generation or degrader epoch)
/// builds the replacement and swaps it in; the point cache lock is only
/// held while building.
#[derive(Debug)]
pub(crate) struct RingSlots {
    slots: DashMap<i32, Arc<PartitionSlot>>,
    cleanup_rate: f64,
}

impl RingSlots {
    pub fn new(cleanup_rate: f64) -> Self {
        Self {
            slots: DashMap::new(),
            cleanup_rate,
        }
    }

    /// Ring of `partition` for cluster generation `generation`.
    ///
    /// A caller holding an older generation than the published ring gets a
    /// ring built for its own generation, never the newer one.
    pub fn ring<F>(&self, generation: u64, epoch: u64, partition: i32, points: F) -> Arc<HashRing>
    where
        F: FnOnce(RingBuild<'_>) -> HashMap<Uri, u32>,
    {
        let slot = self
            .slots
            .entry(partition)
            .or_insert_with(|| Arc::new(PartitionSlot::default()))
            .clone();

        let current = slot.current.load_full();
        if let Some(published) = &current {
            if published.generation == generation && published.epoch == epoch {
                return Arc::clone(&published.ring);
            }
        }

        let publish = match &current {
            Some(published) => published.generation <= generation,
            None => true,
        };
        let desired = points(RingBuild {
            previous: current.as_deref(),
            publish,
        });

        let ring = {
            let mut cache = slot.cache.lock();
            let ring = match current.as_deref() {
                Some(published) if publish => rebuild(published, &desired, &mut cache),
                _ => HashRing::with_cache(&desired, &mut cache),
            };
            if publish {
                cache.trim(&desired, self.cleanup_rate);
            }
            Arc::new(ring)
        };

        if publish {
            trace!(partition, generation, epoch, points = ring.len(), "Publishing ring");
            let next = Arc::new(PartitionRing {
                generation,
                epoch,
                points: desired,
                ring: Arc::clone(&ring),
            });
            // Losing the race is fine: the winner built from the same or a
            // newer state, and this caller still gets a ring for its own
            // generation.
            let _ = slot.current.compare_and_swap(&current, Some(next));
        }
        ring
    }

    /// Drops the rings of partitions for which `keep` is false.
    pub fn retain_partitions(&self, keep: impl Fn(i32) -> bool) {
        self.slots.retain(|partition, _| keep(*partition));
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}

fn rebuild(published: &PartitionRing, desired: &HashMap<Uri, u32>, cache: &mut RingPointCache) -> HashRing {
    let changed: HashSet<&Uri> = published
        .points
        .keys()
        .chain(desired.keys())
        .filter(|host| published.points.get(*host) != desired.get(*host))
        .collect();

    if changed.len() > INCREMENTAL_HOST_LIMIT {
        return HashRing::with_cache(desired, cache);
    }

    let mut ring = (*published.ring).clone();
    for host in changed {
        let count = desired.get(host).copied().unwrap_or(0);
        ring = ring.with_host_points(host, count, cache);
    }
    ring
}
