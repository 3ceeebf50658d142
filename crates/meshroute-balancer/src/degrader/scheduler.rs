use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use http::Uri;
use meshroute_metrics::{CallStatsSource, CallTracker};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::cluster::{ClusterDropController, ClusterWindow};
use super::config::DegraderSettings;
use super::controller::{DegraderController, WeightChange};

struct TrackedHost {
    tracker: Arc<CallTracker>,
    controller: Arc<Mutex<DegraderController>>,
    task: JoinHandle<()>,
}

impl Drop for TrackedHost {
    fn drop(&mut self) {
        self.task.abort();
        self.tracker.close();
    }
}

/// Interval reports of every host, and the drop rate judged from them.
#[derive(Debug)]
struct ClusterDropping {
    window: Mutex<ClusterWindow>,
    controller: Mutex<ClusterDropController>,
}

/// Runs one degrader task per tracked host of a service.
///
/// Every task ticks independently on the shared runtime, so a slow host
/// never delays the others. The scheduler's epoch moves whenever any weight
/// changes; ring holders compare it to decide when to rebuild.
///
/// Host tasks also report their intervals to a cluster task, which ticks
/// half an interval out of phase with them and sets the fraction of calls
/// to drop service-wide.
pub struct DegraderScheduler {
    service: String,
    runtime: Handle,
    interval: Duration,
    settings: RwLock<DegraderSettings>,
    hosts: DashMap<Uri, TrackedHost>,
    epoch: Arc<AtomicU64>,
    cluster: Arc<ClusterDropping>,
    cluster_task: JoinHandle<()>,
    closed: AtomicBool,
}

impl DegraderScheduler {
    pub fn new(service: impl Into<String>, runtime: Handle, interval: Duration, settings: DegraderSettings) -> Self {
        let service = service.into();
        let cluster = Arc::new(ClusterDropping {
            window: Mutex::new(ClusterWindow::default()),
            controller: Mutex::new(ClusterDropController::new(settings.clone())),
        });
        let cluster_task = runtime.spawn(run_cluster_dropping(service.clone(), Arc::clone(&cluster), interval));

        Self {
            service,
            runtime,
            interval,
            settings: RwLock::new(settings),
            hosts: DashMap::new(),
            epoch: Arc::new(AtomicU64::new(0)),
            cluster,
            cluster_task,
            closed: AtomicBool::new(false),
        }
    }

    /// Fraction of calls currently dropped service-wide.
    pub fn drop_rate(&self) -> f64 {
        self.cluster.controller.lock().drop_rate()
    }

    /// Draws whether to drop one call at the current drop rate. Nothing is
    /// dropped after shutdown.
    pub fn should_drop(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let rate = self.drop_rate();
        rate > 0.0 && rand::random::<f64>() < rate
    }

    /// Counter bumped on every weight change.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Current weight multiplier of `host`, starting a task for it if it is
    /// not tracked yet. New hosts start at full weight, or slow-start when
    /// `recovering` is set. After shutdown nothing new is tracked and
    /// untracked hosts report full weight.
    pub fn track(&self, host: &Uri, recovering: bool) -> f64 {
        if let Some(tracked) = self.hosts.get(host) {
            return tracked.controller.lock().weight();
        }
        if self.closed.load(Ordering::Acquire) {
            return 1.0;
        }

        let tracked = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| self.spawn(host, recovering));
        let weight = tracked.controller.lock().weight();
        weight
    }

    pub fn multiplier(&self, host: &Uri) -> Option<f64> {
        self.hosts
            .get(host)
            .map(|tracked| tracked.controller.lock().weight())
    }

    /// Call tracker feeding the host's controller.
    pub fn tracker(&self, host: &Uri) -> Option<Arc<CallTracker>> {
        self.hosts.get(host).map(|tracked| Arc::clone(&tracked.tracker))
    }

    pub fn tracked_hosts(&self) -> Vec<Uri> {
        self.hosts.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Stops tracking every host for which `keep` is false. Their state is
    /// discarded; a host that comes back starts over.
    pub fn retain(&self, keep: impl Fn(&Uri) -> bool) {
        let before = self.hosts.len();
        self.hosts.retain(|host, _| keep(host));
        let reaped = before.saturating_sub(self.hosts.len());
        if reaped > 0 {
            debug!(service = %self.service, reaped, "Reaped degrader state of departed hosts");
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Applies new thresholds to every tracked host.
    pub fn update_settings(&self, settings: DegraderSettings) {
        let now = tokio::time::Instant::now().into_std();
        *self.settings.write() = settings.clone();
        self.cluster.controller.lock().set_settings(settings.clone());
        let mut changed = false;
        for entry in self.hosts.iter() {
            if let Some(change) = entry.controller.lock().set_settings(settings.clone(), now) {
                log_change(&self.service, entry.key(), &change, settings.log_enabled);
                changed = true;
            }
        }
        if changed {
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Aborts every degrader task and stops tracking new hosts.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.cluster_task.abort();
        self.hosts.clear();
    }

    fn spawn(&self, host: &Uri, recovering: bool) -> TrackedHost {
        let settings = self.settings.read().clone();
        let controller = if recovering {
            DegraderController::recovering(settings)
        } else {
            DegraderController::new(settings)
        };
        debug!(
            service = %self.service,
            host = %host,
            weight = controller.weight(),
            "Tracking host"
        );

        let tracker = Arc::new(CallTracker::new());
        let controller = Arc::new(Mutex::new(controller));
        let task = self.runtime.spawn(run_degrader(
            self.service.clone(),
            host.clone(),
            Arc::clone(&tracker),
            Arc::clone(&controller),
            Arc::clone(&self.epoch),
            Arc::clone(&self.cluster),
            self.interval,
        ));

        TrackedHost {
            tracker,
            controller,
            task,
        }
    }
}

impl Drop for DegraderScheduler {
    fn drop(&mut self) {
        self.cluster_task.abort();
        self.hosts.clear();
    }
}

async fn run_degrader(
    service: String,
    host: Uri,
    tracker: Arc<CallTracker>,
    controller: Arc<Mutex<DegraderController>>,
    epoch: Arc<AtomicU64>,
    cluster: Arc<ClusterDropping>,
    interval: Duration,
) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let stats = tracker.rollover();
        let now = tokio::time::Instant::now().into_std();
        if let Ok(stats) = &stats {
            cluster.window.lock().record(stats);
        }

        let (change, log_enabled) = {
            let mut controller = controller.lock();
            let change = controller.update(stats, now);
            (change, controller.settings().log_enabled)
        };

        if let Some(change) = change {
            epoch.fetch_add(1, Ordering::AcqRel);
            log_change(&service, &host, &change, log_enabled);
        }
    }
}

async fn run_cluster_dropping(service: String, cluster: Arc<ClusterDropping>, interval: Duration) {
    let start = tokio::time::Instant::now() + interval + interval / 2;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let window = std::mem::take(&mut *cluster.window.lock());

        let mut controller = cluster.controller.lock();
        let Some(from) = controller.update(&window) else {
            continue;
        };
        let to = controller.drop_rate();
        let log_enabled = controller.settings().log_enabled;
        drop(controller);

        let latency = window.average_latency_ms().unwrap_or(0.0);
        if !log_enabled {
            debug!(service, calls = window.call_count, "Cluster drop rate {:.2} -> {:.2}", from, to);
        } else if to > from {
            warn!(
                service,
                calls = window.call_count,
                "Dropping calls: average latency {:.0}ms, drop rate {:.2} -> {:.2}",
                latency,
                from,
                to
            );
        } else {
            info!(
                service,
                calls = window.call_count,
                "Easing call dropping: average latency {:.0}ms, drop rate {:.2} -> {:.2}",
                latency,
                from,
                to
            );
        }
    }
}

fn log_change(service: &str, host: &Uri, change: &WeightChange, log_enabled: bool) {
    if !log_enabled {
        debug!(
            service,
            host = %host,
            "Degrader weight {:.4} -> {:.4} ({:?})",
            change.from,
            change.to,
            change.phase
        );
    } else if change.is_decrease() {
        warn!(
            service,
            host = %host,
            "Degrading host: weight {:.4} -> {:.4} ({:?})",
            change.from,
            change.to,
            change.phase
        );
    } else {
        info!(
            service,
            host = %host,
            "Recovering host: weight {:.4} -> {:.4} ({:?})",
            change.from,
            change.to,
            change.phase
        );
    }
}
