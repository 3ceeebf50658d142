use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use http::Uri;
use xxhash_rust::xxh64::xxh64;

/// Ring positions live in `[0, 2^31)`.
pub const RING_MASK: u64 = 0x7fff_ffff;

/// Position of the `index`-th point of `host`: `xxh64("{host}-{index}") mod 2^31`.
pub fn point_position(host: &str, index: u32) -> u32 {
    let label = format!("{}-{}", host, index);
    (xxh64(label.as_bytes(), 0) & RING_MASK) as u32
}

/// Points a host gets for a weight: `round(weight × points_per_weight)`.
pub fn points_for_weight(weight: f64, points_per_weight: u32) -> u32 {
    let points = (weight * f64::from(points_per_weight)).round();
    if points.is_finite() && points > 0.0 {
        points.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

#[derive(Debug)]
struct RingHost {
    uri: Uri,
    key: String,
}

#[derive(Debug, Clone)]
struct RingPoint {
    position: u32,
    host: Arc<RingHost>,
}

fn compare_points(a: &RingPoint, b: &RingPoint) -> Ordering {
    a.position
        .cmp(&b.position)
        .then_with(|| a.host.key.cmp(&b.host.key))
}

/// Memoized point positions per host.
///
/// Recomputing positions dominates ring construction, so positions are kept
/// across rebuilds and only extended when a host gains points.
#[derive(Debug, Default)]
pub struct RingPointCache {
    positions: HashMap<String, Vec<u32>>,
}

impl RingPointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `count` positions of `host`.
    pub fn positions(&mut self, host: &str, count: u32) -> &[u32] {
        let cached = self.positions.entry(host.to_string()).or_default();
        let wanted = count as usize;
        if cached.len() < wanted {
            let have = cached.len() as u32;
            cached.extend((have..count).map(|i| point_position(host, i)));
        }
        &cached[..wanted]
    }

    /// Drops hosts no longer in use and compacts entries whose unused share
    /// exceeds `cleanup_rate`.
    pub fn trim(&mut self, in_use: &HashMap<Uri, u32>, cleanup_rate: f64) {
        let in_use: HashMap<String, u32> = in_use
            .iter()
            .map(|(uri, points)| (uri.to_string(), *points))
            .collect();

        self.positions.retain(|host, cached| match in_use.get(host) {
            None => false,
            Some(&used) => {
                let used = used as usize;
                if !cached.is_empty() && used < cached.len() {
                    let unused_share = (cached.len() - used) as f64 / cached.len() as f64;
                    if unused_share > cleanup_rate {
                        cached.truncate(used);
                        cached.shrink_to_fit();
                    }
                }
                true
            }
        });
    }

    /// Total cached positions across hosts.
    pub fn len(&self) -> usize {
        self.positions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consistent-hash ring for one (cluster, partition).
///
/// Construction and lookup are fully deterministic: the same host/point map
/// always produces the same ring, and `get` is a pure function of the ring
/// and the query hash.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    points: Vec<RingPoint>,
    point_counts: HashMap<Uri, u32>,
}

impl HashRing {
    /// Builds a ring giving each host the requested number of points.
    /// Hosts with zero points are left out.
    pub fn new(points: &HashMap<Uri, u32>) -> Self {
        Self::with_cache(points, &mut RingPointCache::new())
    }

    /// Builds a ring from weights scaled by `points_per_weight`.
    pub fn from_weights(weights: &HashMap<Uri, f64>, points_per_weight: u32) -> Self {
        let points: HashMap<Uri, u32> = weights
            .iter()
            .map(|(uri, weight)| (uri.clone(), points_for_weight(*weight, points_per_weight)))
            .collect();
        Self::new(&points)
    }

    /// Builds a ring reusing positions memoized in `cache`.
    pub fn with_cache(points: &HashMap<Uri, u32>, cache: &mut RingPointCache) -> Self {
        let mut ring_points = Vec::with_capacity(points.values().map(|&n| n as usize).sum());
        let mut point_counts = HashMap::with_capacity(points.len());

        for (uri, &count) in points {
            if count == 0 {
                continue;
            }
            let host = Arc::new(RingHost {
                uri: uri.clone(),
                key: uri.to_string(),
            });
            for &position in cache.positions(&host.key, count) {
                ring_points.push(RingPoint {
                    position,
                    host: Arc::clone(&host),
                });
            }
            point_counts.insert(uri.clone(), count);
        }

        ring_points.sort_unstable_by(compare_points);
        Self {
            points: ring_points,
            point_counts,
        }
    }

    /// Returns a copy of this ring with `host` holding exactly `count`
    /// points. Only that host's points move; zero removes it.
    pub fn with_host_points(&self, host: &Uri, count: u32, cache: &mut RingPointCache) -> Self {
        if self.point_count(host) == count {
            return self.clone();
        }

        let mut point_counts = self.point_counts.clone();
        let remaining = self.points.iter().filter(|p| &p.host.uri != host);

        let mut added: Vec<RingPoint> = Vec::new();
        if count > 0 {
            let entry = Arc::new(RingHost {
                uri: host.clone(),
                key: host.to_string(),
            });
            added = cache
                .positions(&entry.key, count)
                .iter()
                .map(|&position| RingPoint {
                    position,
                    host: Arc::clone(&entry),
                })
                .collect();
            added.sort_unstable_by(compare_points);
            point_counts.insert(host.clone(), count);
        } else {
            point_counts.remove(host);
        }

        Self {
            points: merge_sorted(remaining, added),
            point_counts,
        }
    }

    /// First host clockwise from `hash`, inclusive of a point at `hash`.
    pub fn get(&self, hash: u32) -> Option<&Uri> {
        if self.points.is_empty() {
            return None;
        }
        let index = self.start_index(hash);
        Some(&self.points[index].host.uri)
    }

    /// Distinct hosts in ring order starting clockwise from `hash`.
    pub fn ordered_hosts(&self, hash: u32) -> OrderedHosts<'_> {
        let start = if self.points.is_empty() {
            0
        } else {
            self.start_index(hash)
        };
        OrderedHosts {
            ring: self,
            start,
            visited: 0,
            seen: HashSet::new(),
        }
    }

    pub fn point_count(&self, host: &Uri) -> u32 {
        self.point_counts.get(host).copied().unwrap_or(0)
    }

    /// Point counts of every host on the ring.
    pub fn point_counts(&self) -> &HashMap<Uri, u32> {
        &self.point_counts
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Uri> {
        self.point_counts.keys()
    }

    pub fn host_count(&self) -> usize {
        self.point_counts.len()
    }

    /// Total points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn start_index(&self, hash: u32) -> usize {
        let index = self.points.partition_point(|p| p.position < hash);
        if index == self.points.len() {
            0
        } else {
            index
        }
    }
}

fn merge_sorted<'a>(
    existing: impl Iterator<Item = &'a RingPoint>,
    added: Vec<RingPoint>,
) -> Vec<RingPoint> {
    let mut merged = Vec::with_capacity(added.len());
    let mut existing = existing.peekable();
    let mut added = added.into_iter().peekable();

    loop {
        let take_existing = match (existing.peek(), added.peek()) {
            (Some(a), Some(b)) => compare_points(*a, b) != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        if take_existing {
            if let Some(point) = existing.next() {
                merged.push(point.clone());
            }
        } else if let Some(point) = added.next() {
            merged.push(point);
        }
    }

    merged
}

/// Iterator over distinct ring hosts, clockwise, for one revolution.
#[derive(Debug)]
pub struct OrderedHosts<'a> {
    ring: &'a HashRing,
    start: usize,
    visited: usize,
    seen: HashSet<&'a Uri>,
}

impl<'a> Iterator for OrderedHosts<'a> {
    type Item = &'a Uri;

    fn next(&mut self) -> Option<&'a Uri> {
        let ring = self.ring;
        let points = &ring.points;
        while self.visited < points.len() && self.seen.len() < ring.point_counts.len() {
            let point = &points[(self.start + self.visited) % points.len()];
            self.visited += 1;
            if self.seen.insert(&point.host.uri) {
                return Some(&point.host.uri);
            }
        }
        None
    }
}
