//! Property cache and derived routing state.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use http::Uri;
use meshroute_common::error::{Result, RouteError};
use meshroute_common::event::{PropertyEvent, PropertyKind, PropertyValue};
use meshroute_common::properties::{
    next_version, ClusterProperties, ServiceProperties, UriProperties, VersionedProperty,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::degrader::DegraderConfig;
use crate::hashing::HashRing;
use crate::partition::{PartitionAccessor, PartitionAccessorRegistry};
use crate::strategy::{LoadBalancerStrategy, StrategyConfig, StrategyRegistry};

type Callback = Box<dyn FnOnce() + Send>;

/// Tells the coordination layer which property names to deliver.
pub trait PropertySubscriber: Send + Sync {
    fn subscribe(&self, kind: PropertyKind, name: &str);
}

/// Subscriber for feeds that push everything unasked.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSubscriber;

impl PropertySubscriber for NullSubscriber {
    fn subscribe(&self, _kind: PropertyKind, _name: &str) {}
}

/// Load balancer state configuration.
#[derive(Debug, Clone)]
pub struct LoadBalancerStateConfig {
    /// Property events buffered before senders wait.
    pub channel_capacity: usize,
}

impl Default for LoadBalancerStateConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// One consistent view of a cluster: its properties, membership and the
/// partition accessor built from them.
///
/// Generations are immutable and published with a single swap, so a reader
/// never pairs the properties of one generation with the accessor or rings
/// of another. Rings are keyed by [`version`](Self::version).
#[derive(Debug, Clone)]
pub struct ClusterGeneration {
    pub version: u64,
    pub cluster: VersionedProperty<ClusterProperties>,
    /// Membership; `None` until the first uri properties arrive.
    pub uris: Option<VersionedProperty<UriProperties>>,
    pub accessor: VersionedProperty<PartitionAccessor>,
}

impl ClusterGeneration {
    pub fn cluster_name(&self) -> &str {
        &self.cluster.cluster_name
    }

    pub fn max_partition_id(&self) -> i32 {
        self.accessor.max_partition_id()
    }

    /// Every partition id the cluster's partitioning can produce.
    pub fn partition_ids(&self) -> impl Iterator<Item = i32> {
        0..=self.max_partition_id()
    }

    /// Announced, unbanned hosts of `partition` with their weights,
    /// restricted to `scheme` when given.
    pub fn hosts_for_partition(&self, partition: i32, scheme: Option<&str>) -> Vec<(&Uri, f64)> {
        let Some(uris) = &self.uris else {
            return Vec::new();
        };
        uris.hosts_for_partition(partition)
            .filter(|(host, _)| !self.cluster.is_banned(host))
            .filter(|(host, _)| match scheme {
                Some(scheme) => host
                    .scheme_str()
                    .map(|s| s.eq_ignore_ascii_case(scheme))
                    .unwrap_or(false),
                None => true,
            })
            .collect()
    }

    /// Whether any announced, unbanned host of `partition` uses `scheme`.
    pub fn has_hosts(&self, partition: i32, scheme: &str) -> bool {
        !self.hosts_for_partition(partition, Some(scheme)).is_empty()
    }

    /// Whether any announced, unbanned host uses `scheme`.
    pub fn has_scheme(&self, scheme: &str) -> bool {
        self.uris
            .as_ref()
            .map(|uris| {
                uris.hosts().any(|host| {
                    !self.cluster.is_banned(host)
                        && host
                            .scheme_str()
                            .map(|s| s.eq_ignore_ascii_case(scheme))
                            .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    pub fn contains_host(&self, host: &Uri) -> bool {
        self.uris
            .as_ref()
            .map(|uris| uris.partitions.contains_key(host))
            .unwrap_or(false)
    }

    /// Whether membership has arrived.
    pub fn is_complete(&self) -> bool {
        self.uris.is_some()
    }
}

/// Everything the request path needs to route to one service.
#[derive(Debug, Clone)]
pub struct ServiceRoute {
    pub service: VersionedProperty<ServiceProperties>,
    pub generation: Arc<ClusterGeneration>,
    /// First prioritized scheme with a strategy and at least one host, or
    /// the first with a strategy when no scheme has hosts.
    pub scheme: String,
    pub strategy: Arc<LoadBalancerStrategy>,
    /// Every prioritized scheme with a strategy, in priority order.
    candidates: Vec<(String, Arc<LoadBalancerStrategy>)>,
}

impl ServiceRoute {
    /// Scheme and strategy serving `partition`: the first prioritized
    /// scheme announced by a host of the partition, falling back to
    /// [`scheme`](Self::scheme).
    pub fn for_partition(&self, partition: i32) -> (&str, &Arc<LoadBalancerStrategy>) {
        self.candidates
            .iter()
            .find(|(scheme, _)| self.generation.has_hosts(partition, scheme))
            .map(|(scheme, strategy)| (scheme.as_str(), strategy))
            .unwrap_or((self.scheme.as_str(), &self.strategy))
    }

    /// Strategy serving `partition`.
    pub fn strategy_for(&self, partition: i32) -> &Arc<LoadBalancerStrategy> {
        self.for_partition(partition).1
    }

    /// Ring of `partition`, built by the strategy serving it.
    pub fn ring(&self, partition: i32) -> Arc<HashRing> {
        self.strategy_for(partition).ring(&self.generation, partition)
    }
}

enum Command {
    Event(PropertyEvent),
    Flush(oneshot::Sender<()>),
}

/// Producer side of the property feed.
#[derive(Clone)]
pub struct PropertySender {
    tx: mpsc::Sender<Command>,
}

impl PropertySender {
    /// Queues `event` for ingestion.
    pub async fn send(&self, event: PropertyEvent) -> Result<()> {
        self.tx
            .send(Command::Event(event))
            .await
            .map_err(|_| RouteError::ShutDown)
    }

    /// Decodes a store payload and queues it as an add. Malformed payloads
    /// are logged and rejected without touching the state.
    pub async fn publish_json(&self, kind: PropertyKind, name: &str, json: &str) -> Result<()> {
        let value = match PropertyValue::from_json(kind, json) {
            Ok(value) => value,
            Err(e) => {
                warn!("Dropping malformed {} property {}: {}", kind, name, e);
                return Err(e);
            }
        };
        if value.name() != name {
            warn!("Dropping {} property {}: payload names {}", kind, name, value.name());
            return Err(RouteError::malformed(
                name,
                format!("payload is for '{}'", value.name()),
            ));
        }
        self.send(PropertyEvent::add(value)).await
    }

    /// Resolves once every event sent before it has been applied, including
    /// the rebuilds it triggered.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(tx))
            .await
            .map_err(|_| RouteError::ShutDown)?;
        rx.await.map_err(|_| RouteError::ShutDown)
    }
}

impl fmt::Debug for PropertySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[derive(Default)]
struct Listeners {
    clusters: HashMap<String, Vec<Callback>>,
    services: HashMap<String, Vec<Callback>>,
    watched_clusters: HashSet<String>,
    watched_services: HashSet<String>,
}

#[derive(Default)]
struct PendingRebuilds {
    clusters: HashSet<String>,
    flushes: Vec<oneshot::Sender<()>>,
}

struct StateInner {
    runtime: Handle,
    strategy_registry: StrategyRegistry,
    accessor_registry: PartitionAccessorRegistry,
    subscriber: Arc<dyn PropertySubscriber>,
    clusters: DashMap<String, VersionedProperty<ClusterProperties>>,
    uris: DashMap<String, VersionedProperty<UriProperties>>,
    services: DashMap<String, VersionedProperty<ServiceProperties>>,
    generations: DashMap<String, Arc<ClusterGeneration>>,
    strategies: DashMap<(String, String), Arc<LoadBalancerStrategy>>,
    listeners: Mutex<Listeners>,
    pending: Mutex<PendingRebuilds>,
    rebuild_notify: Notify,
    ingestion_done: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Builder for [`LoadBalancerState`].
pub struct LoadBalancerStateBuilder {
    config: LoadBalancerStateConfig,
    strategy_registry: StrategyRegistry,
    accessor_registry: PartitionAccessorRegistry,
    subscriber: Arc<dyn PropertySubscriber>,
}

impl LoadBalancerStateBuilder {
    pub fn config(mut self, config: LoadBalancerStateConfig) -> Self {
        self.config = config;
        self
    }

    pub fn strategy_registry(mut self, registry: StrategyRegistry) -> Self {
        self.strategy_registry = registry;
        self
    }

    pub fn partition_accessor_registry(mut self, registry: PartitionAccessorRegistry) -> Self {
        self.accessor_registry = registry;
        self
    }

    pub fn subscriber(mut self, subscriber: Arc<dyn PropertySubscriber>) -> Self {
        self.subscriber = subscriber;
        self
    }

    /// Starts the ingestion and rebuild tasks on the current tokio runtime.
    ///
    /// # Returns
    /// The state and the sender the property feed publishes into.
    ///
    /// # Errors
    /// `RouteError::Runtime` when called outside a tokio runtime.
    pub fn spawn(self) -> Result<(LoadBalancerState, PropertySender)> {
        let runtime = Handle::try_current().map_err(|e| RouteError::Runtime(e.to_string()))?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(StateInner {
            runtime: runtime.clone(),
            strategy_registry: self.strategy_registry,
            accessor_registry: self.accessor_registry,
            subscriber: self.subscriber,
            clusters: DashMap::new(),
            uris: DashMap::new(),
            services: DashMap::new(),
            generations: DashMap::new(),
            strategies: DashMap::new(),
            listeners: Mutex::new(Listeners::default()),
            pending: Mutex::new(PendingRebuilds::default()),
            rebuild_notify: Notify::new(),
            ingestion_done: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let ingestion = runtime.spawn(run_ingestion(Arc::clone(&inner), rx, shutdown_rx.clone()));
        let rebuilds = runtime.spawn(run_rebuilds(Arc::clone(&inner), shutdown_rx));
        inner.tasks.lock().extend([ingestion, rebuilds]);

        info!("Load balancer state started");
        Ok((LoadBalancerState { inner }, PropertySender { tx }))
    }
}

/// Client-side cache of cluster, service and membership properties and the
/// routing state derived from them.
///
/// Property events flow through a single ingestion task, which validates
/// them and swaps the cached snapshots. Cluster changes are handed to a
/// rebuild task that constructs the next [`ClusterGeneration`] and publishes
/// it in one swap, so lookups never wait on ingestion and never see a torn
/// generation.
///
/// # Example
/// ```
/// # use meshroute_balancer::LoadBalancerState;
/// # use meshroute_common::{ClusterProperties, PropertyEvent, PropertyValue, UriProperties};
/// # #[tokio::main]
/// # async fn main() -> meshroute_common::Result<()> {
/// let (state, sender) = LoadBalancerState::builder().spawn()?;
/// sender
///     .send(PropertyEvent::add(PropertyValue::Cluster(ClusterProperties::new("members"))))
///     .await?;
/// sender
///     .send(PropertyEvent::add(PropertyValue::Uri(
///         UriProperties::new("members").with_host("http://host-1:8080".parse().unwrap(), 1.0),
///     )))
///     .await?;
/// sender.flush().await?;
///
/// assert!(state.partition_accessor("members").is_some());
/// state.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LoadBalancerState {
    inner: Arc<StateInner>,
}

impl LoadBalancerState {
    /// Builder with the default strategy registry, no custom partition
    /// accessors and a [`NullSubscriber`].
    pub fn builder() -> LoadBalancerStateBuilder {
        LoadBalancerStateBuilder {
            config: LoadBalancerStateConfig::default(),
            strategy_registry: StrategyRegistry::default(),
            accessor_registry: PartitionAccessorRegistry::new(),
            subscriber: Arc::new(NullSubscriber),
        }
    }

    /// Calls `callback` once the cluster's properties and membership are
    /// both available, immediately if they already are.
    ///
    /// Registering twice subscribes once; each callback still fires.
    ///
    /// # Errors
    /// `RouteError::ShutDown` after [`shutdown`](Self::shutdown).
    pub fn listen_to_cluster(&self, name: &str, callback: impl FnOnce() + Send + 'static) -> Result<()> {
        self.ensure_open()?;
        let mut listeners = self.inner.listeners.lock();
        if self.inner.cluster_ready(name) {
            drop(listeners);
            callback();
            return Ok(());
        }
        listeners
            .clusters
            .entry(name.to_string())
            .or_default()
            .push(Box::new(callback));
        let newly_watched = listeners.watched_clusters.insert(name.to_string());
        drop(listeners);

        if newly_watched {
            self.inner.subscribe_cluster(name);
        }
        Ok(())
    }

    /// Calls `callback` once the service's properties are available,
    /// immediately if they already are.
    ///
    /// # Errors
    /// `RouteError::ShutDown` after [`shutdown`](Self::shutdown).
    pub fn listen_to_service(&self, name: &str, callback: impl FnOnce() + Send + 'static) -> Result<()> {
        self.ensure_open()?;
        let mut listeners = self.inner.listeners.lock();
        if self.inner.services.contains_key(name) {
            drop(listeners);
            callback();
            return Ok(());
        }
        listeners
            .services
            .entry(name.to_string())
            .or_default()
            .push(Box::new(callback));
        let newly_watched = listeners.watched_services.insert(name.to_string());
        drop(listeners);

        if newly_watched {
            self.inner.subscriber.subscribe(PropertyKind::Service, name);
        }
        Ok(())
    }

    pub fn cluster_properties(&self, name: &str) -> Option<VersionedProperty<ClusterProperties>> {
        self.inner.clusters.get(name).map(|p| p.clone())
    }

    pub fn service_properties(&self, name: &str) -> Option<VersionedProperty<ServiceProperties>> {
        self.inner.services.get(name).map(|p| p.clone())
    }

    pub fn uri_properties(&self, cluster: &str) -> Option<VersionedProperty<UriProperties>> {
        self.inner.uris.get(cluster).map(|p| p.clone())
    }

    /// Partition accessor of the cluster's published generation.
    pub fn partition_accessor(&self, cluster: &str) -> Option<VersionedProperty<PartitionAccessor>> {
        self.generation(cluster).map(|g| g.accessor.clone())
    }

    /// The cluster's published generation.
    pub fn generation(&self, cluster: &str) -> Option<Arc<ClusterGeneration>> {
        self.inner.generations.get(cluster).map(|g| Arc::clone(&g))
    }

    /// Strategy serving `service` over `scheme`: the first name in the
    /// service's strategy list the registry supports for that scheme. Built
    /// on first use and cached per (service, scheme).
    pub fn strategy(&self, service: &str, scheme: &str) -> Option<Arc<LoadBalancerStrategy>> {
        self.inner.strategy(service, scheme)
    }

    /// Resolves the service, its cluster generation and the strategies of
    /// its prioritized schemes. Schemes no host announces are passed over.
    ///
    /// # Errors
    /// `RouteError::ServiceUnavailable` when the service or its cluster is
    /// unknown, or no strategy serves any of the cluster's schemes.
    pub fn route(&self, service_name: &str) -> Result<ServiceRoute> {
        let service = self.service_properties(service_name).ok_or_else(|| {
            RouteError::ServiceUnavailable(format!("service {} is not configured", service_name))
        })?;
        let generation = self.generation(&service.cluster_name).ok_or_else(|| {
            RouteError::ServiceUnavailable(format!(
                "cluster {} of service {} is not available",
                service.cluster_name, service_name
            ))
        })?;

        let candidates: Vec<(String, Arc<LoadBalancerStrategy>)> = generation
            .cluster
            .prioritized_schemes
            .iter()
            .filter_map(|scheme| {
                self.strategy(service_name, scheme)
                    .map(|strategy| (scheme.clone(), strategy))
            })
            .collect();

        let preferred = candidates
            .iter()
            .find(|(scheme, _)| generation.has_scheme(scheme))
            .or_else(|| candidates.first())
            .cloned();
        let Some((scheme, strategy)) = preferred else {
            return Err(RouteError::ServiceUnavailable(format!(
                "no load balancer strategy of service {} supports schemes {:?}",
                service_name, generation.cluster.prioritized_schemes
            )));
        };

        Ok(ServiceRoute {
            service,
            generation,
            scheme,
            strategy,
            candidates,
        })
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.inner.clusters.iter().map(|e| e.key().clone()).collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.inner.services.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stops ingestion, drains queued rebuilds and stops every degrader.
    /// Pending listener callbacks are dropped without firing. Lookups keep
    /// answering from the last published state. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!("Shutting down load balancer state");
        }
        let _ = self.inner.shutdown_tx.send(true);
        self.inner.rebuild_notify.notify_one();

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!("Load balancer state task failed: {}", e);
                }
            }
        }

        {
            let mut listeners = self.inner.listeners.lock();
            listeners.clusters.clear();
            listeners.services.clear();
        }
        for strategy in self.inner.strategies.iter() {
            strategy.shutdown();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(RouteError::ShutDown)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for LoadBalancerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancerState")
            .field("clusters", &self.inner.clusters.len())
            .field("services", &self.inner.services.len())
            .field("strategies", &self.inner.strategies.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn fire(callbacks: Vec<Callback>) {
    for callback in callbacks {
        callback();
    }
}

impl StateInner {
    fn cluster_ready(&self, name: &str) -> bool {
        self.generations
            .get(name)
            .map(|g| g.is_complete())
            .unwrap_or(false)
    }

    fn subscribe_cluster(&self, name: &str) {
        self.subscriber.subscribe(PropertyKind::Cluster, name);
        self.subscriber.subscribe(PropertyKind::Uri, name);
    }

    fn watch_cluster(&self, name: &str) {
        let newly_watched = self.listeners.lock().watched_clusters.insert(name.to_string());
        if newly_watched {
            debug!("Watching cluster {}", name);
            self.subscribe_cluster(name);
        }
    }

    fn strategy(&self, service: &str, scheme: &str) -> Option<Arc<LoadBalancerStrategy>> {
        let key = (service.to_string(), scheme.to_string());
        if let Some(strategy) = self.strategies.get(&key) {
            return Some(Arc::clone(&strategy));
        }
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        let properties = self.services.get(service).map(|p| p.clone())?;
        let (name, kind) = self
            .strategy_registry
            .select(&properties.load_balancer_strategy_list, scheme)?;

        match self.strategies.entry(key) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                match self
                    .strategy_registry
                    .build(name, kind, &properties, scheme, self.runtime.clone())
                {
                    Ok(strategy) => {
                        debug!("Built {} strategy for service {} over {}", name, service, scheme);
                        Some(Arc::clone(entry.insert(Arc::new(strategy)).value()))
                    }
                    Err(e) => {
                        warn!("Cannot build {} strategy for service {}: {}", name, service, e);
                        None
                    }
                }
            }
        }
    }

    fn apply(&self, event: PropertyEvent) {
        let value = match event.value() {
            Ok(value) => value.cloned(),
            Err(e) => {
                warn!("Dropping {} event for {}: {}", event.kind, event.name, e);
                return;
            }
        };
        let value = match value.map(PropertyValue::validated).transpose() {
            Ok(value) => value,
            Err(e) => {
                warn!("Dropping malformed {} property {}: {}", event.kind, event.name, e);
                return;
            }
        };

        let name = event.name;
        match value {
            Some(PropertyValue::Cluster(properties)) => {
                debug!("Updating cluster properties of {}", name);
                self.clusters.insert(name.clone(), VersionedProperty::new(properties));
                self.schedule_rebuild(name);
            }
            Some(PropertyValue::Uri(properties)) => {
                debug!("Updating membership of cluster {} ({} hosts)", name, properties.partitions.len());
                self.uris.insert(name.clone(), VersionedProperty::new(properties));
                self.schedule_rebuild(name);
            }
            Some(PropertyValue::Service(properties)) => self.update_service(name, properties),
            None => match event.kind {
                PropertyKind::Cluster => {
                    if self.clusters.remove(&name).is_some() {
                        info!("Cluster {} removed", name);
                        self.schedule_rebuild(name);
                    }
                }
                PropertyKind::Uri => {
                    if self.uris.remove(&name).is_some() {
                        info!("Membership of cluster {} removed", name);
                        self.schedule_rebuild(name);
                    }
                }
                PropertyKind::Service => self.remove_service(&name),
            },
        }
    }

    fn update_service(&self, name: String, properties: ServiceProperties) {
        let strategy_config = StrategyConfig::from_map(&properties.load_balancer_strategy_properties);
        let degrader_config = DegraderConfig::from_map(&properties.degrader_properties);
        let (strategy_config, degrader_config) = match (strategy_config, degrader_config) {
            (Ok(s), Ok(d)) => (s, d),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Dropping service properties of {}: {}", name, e);
                return;
            }
        };

        debug!("Updating service properties of {}", name);
        let cluster_name = properties.cluster_name.clone();
        let properties = VersionedProperty::new(properties);
        self.services.insert(name.clone(), properties.clone());
        self.reconcile_strategies(&name, &properties, &strategy_config, &degrader_config);
        self.watch_cluster(&cluster_name);

        let callbacks = self.listeners.lock().services.remove(&name).unwrap_or_default();
        fire(callbacks);
    }

    // Cached strategies survive a service update when the same
    // implementation is still selected with the same strategy settings;
    // otherwise they are dropped and rebuilt on next use.
    fn reconcile_strategies(
        &self,
        service: &str,
        properties: &ServiceProperties,
        strategy_config: &StrategyConfig,
        degrader_config: &DegraderConfig,
    ) {
        let keys: Vec<(String, String)> = self
            .strategies
            .iter()
            .filter(|entry| entry.key().0 == service)
            .map(|entry| entry.key().clone())
            .collect();

        for key in keys {
            let selected = self
                .strategy_registry
                .select(&properties.load_balancer_strategy_list, &key.1);
            let keep = match (selected, self.strategies.get(&key)) {
                (Some((name, kind)), Some(existing)) => {
                    let compatible = existing.name() == name && existing.is_compatible(kind, strategy_config);
                    if compatible {
                        existing.reconfigure(degrader_config);
                    }
                    compatible
                }
                _ => false,
            };

            if !keep {
                if let Some((_, strategy)) = self.strategies.remove(&key) {
                    debug!("Dropping {} strategy of service {} over {}", strategy.name(), key.0, key.1);
                    strategy.shutdown();
                }
            }
        }
    }

    fn remove_service(&self, name: &str) {
        if self.services.remove(name).is_none() {
            return;
        }
        info!("Service {} removed", name);
        self.strategies.retain(|(service, _), strategy| {
            let keep = service != name;
            if !keep {
                strategy.shutdown();
            }
            keep
        });
    }

    fn schedule_rebuild(&self, cluster: String) {
        self.pending.lock().clusters.insert(cluster);
        self.rebuild_notify.notify_one();
    }

    fn schedule_flush(&self, done: oneshot::Sender<()>) {
        self.pending.lock().flushes.push(done);
        self.rebuild_notify.notify_one();
    }

    /// Publishes the next generation of `cluster_name` from the cached
    /// properties. The previous generation stays in effect if the
    /// partition accessor cannot be built.
    fn rebuild(&self, cluster_name: &str) {
        let previous = self.generations.get(cluster_name).map(|g| Arc::clone(&g));
        let Some(cluster) = self.clusters.get(cluster_name).map(|c| c.clone()) else {
            if self.generations.remove(cluster_name).is_some() {
                self.drop_cluster_strategies(cluster_name);
            }
            return;
        };
        let uris = self.uris.get(cluster_name).map(|u| u.clone());

        if let Some(previous) = &previous {
            let same_cluster = previous.cluster.version == cluster.version;
            let same_uris = previous.uris.as_ref().map(|u| u.version) == uris.as_ref().map(|u| u.version);
            if same_cluster && same_uris {
                return;
            }
        }

        let accessor = match &previous {
            Some(previous) if previous.cluster.partition == cluster.partition => previous.accessor.clone(),
            _ => match PartitionAccessor::build(&cluster.partition, &self.accessor_registry) {
                Ok(accessor) => VersionedProperty::new(accessor),
                Err(e) => {
                    warn!("Keeping previous state of cluster {}: {}", cluster_name, e);
                    return;
                }
            },
        };

        let generation = Arc::new(ClusterGeneration {
            version: next_version(),
            cluster,
            uris,
            accessor,
        });
        self.generations
            .insert(cluster_name.to_string(), Arc::clone(&generation));
        info!(
            "Published generation {} of cluster {} ({} partitions, {} hosts)",
            generation.version,
            cluster_name,
            generation.max_partition_id() + 1,
            generation.uris.as_ref().map(|u| u.partitions.len()).unwrap_or(0)
        );

        self.refresh_strategies(&generation);

        if generation.is_complete() {
            let callbacks = self
                .listeners
                .lock()
                .clusters
                .remove(cluster_name)
                .unwrap_or_default();
            fire(callbacks);
        }
    }

    fn strategies_of_cluster(&self, cluster_name: &str) -> Vec<((String, String), Arc<LoadBalancerStrategy>)> {
        self.strategies
            .iter()
            .filter(|entry| {
                self.services
                    .get(&entry.key().0)
                    .map(|s| s.cluster_name == cluster_name)
                    .unwrap_or(false)
            })
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    // Reaps departed hosts and warms the rings of every populated
    // partition so the request path finds them built.
    fn refresh_strategies(&self, generation: &ClusterGeneration) {
        let partitions: Vec<i32> = generation
            .uris
            .as_ref()
            .map(|u| u.partition_ids())
            .unwrap_or_default();

        for (_, strategy) in self.strategies_of_cluster(generation.cluster_name()) {
            strategy.retain(generation);
            for &partition in &partitions {
                if partition <= generation.max_partition_id() {
                    strategy.ring(generation, partition);
                }
            }
        }
    }

    fn drop_cluster_strategies(&self, cluster_name: &str) {
        info!("Dropping state of removed cluster {}", cluster_name);
        for (key, strategy) in self.strategies_of_cluster(cluster_name) {
            self.strategies.remove(&key);
            strategy.shutdown();
        }
    }
}

async fn run_ingestion(
    inner: Arc<StateInner>,
    mut rx: mpsc::Receiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            command = rx.recv() => match command {
                Some(Command::Event(event)) => inner.apply(event),
                Some(Command::Flush(done)) => inner.schedule_flush(done),
                None => break,
            },
        }
    }

    inner.ingestion_done.store(true, Ordering::Release);
    inner.rebuild_notify.notify_one();
    debug!("Property ingestion stopped");
}

async fn run_rebuilds(inner: Arc<StateInner>, shutdown: watch::Receiver<bool>) {
    loop {
        let PendingRebuilds { clusters, flushes } = std::mem::take(&mut *inner.pending.lock());

        if clusters.is_empty() && flushes.is_empty() {
            if inner.ingestion_done.load(Ordering::Acquire) || *shutdown.borrow() {
                break;
            }
            inner.rebuild_notify.notified().await;
            continue;
        }

        for cluster in clusters {
            inner.rebuild(&cluster);
        }
        for done in flushes {
            let _ = done.send(());
        }
    }
    debug!("Rebuild worker stopped");
}
