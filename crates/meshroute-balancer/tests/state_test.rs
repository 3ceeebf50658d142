//! Load Balancer State Integration Tests
//!
//! Drives `LoadBalancerState` through its property feed the way a
//! coordination layer would. Tests cover:
//! 1. JSON payload ingestion and routing
//! 2. Rejection of malformed payloads
//! 3. Snapshot atomicity under concurrent updates
//! 4. Membership changes reaching rings and degraders
//! 5. Shutdown

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::Uri;
use meshroute_balancer::{LoadBalancerState, RequestContext, SimpleLoadBalancer};
use meshroute_common::{
    ClusterProperties, PropertyEvent, PropertyKind, PropertyValue, RouteError, ServiceProperties,
    UriProperties,
};

fn uri(s: &str) -> Uri {
    s.parse().unwrap()
}

async fn add(sender: &meshroute_balancer::PropertySender, value: PropertyValue) {
    sender.send(PropertyEvent::add(value)).await.unwrap();
}

// ============================================================================
// Test 1: JSON Payloads Flow Through To Routing
// ============================================================================

#[tokio::test]
async fn test_json_payloads_route_requests() {
    let (state, sender) = LoadBalancerState::builder().spawn().unwrap();

    sender
        .publish_json(
            PropertyKind::Cluster,
            "profiles-cluster",
            r#"{
                "clusterName": "profiles-cluster",
                "prioritizedSchemes": ["https", "http"],
                "partitionProperties": {
                    "partitionType": "HASH",
                    "partitionKeyRegex": "id=(\\w+)",
                    "partitionCount": 2,
                    "hashAlgorithm": "XXHASH"
                }
            }"#,
        )
        .await
        .unwrap();
    sender
        .publish_json(
            PropertyKind::Uri,
            "profiles-cluster",
            r#"{
                "clusterName": "profiles-cluster",
                "partitions": {
                    "https://p1:8443": {"0": {"weight": 1.0}, "1": {"weight": 1.0}},
                    "https://p2:8443": {"0": {"weight": 1.0}, "1": {"weight": 1.0}}
                }
            }"#,
        )
        .await
        .unwrap();
    sender
        .publish_json(
            PropertyKind::Service,
            "profiles",
            r#"{"serviceName": "profiles", "clusterName": "profiles-cluster", "path": "/profiles"}"#,
        )
        .await
        .unwrap();
    sender.flush().await.unwrap();

    let balancer = SimpleLoadBalancer::new(state.clone());
    let endpoint = balancer
        .resolve(&uri("d2://profiles/get?id=alice"), &RequestContext::default())
        .unwrap();

    assert_eq!(endpoint.scheme, "https");
    assert!(endpoint.partition_id == 0 || endpoint.partition_id == 1);
    assert!(endpoint.request_uri.to_string().ends_with("/profiles/get?id=alice"));

    state.shutdown().await;
}

// ============================================================================
// Test 2: Malformed Payloads Keep The Last Good Snapshot
// ============================================================================

#[tokio::test]
async fn test_malformed_payloads_are_dropped() {
    let (state, sender) = LoadBalancerState::builder().spawn().unwrap();
    add(&sender, PropertyValue::Cluster(ClusterProperties::new("c"))).await;
    add(&sender, PropertyValue::Service(ServiceProperties::new("s", "c"))).await;
    sender.flush().await.unwrap();
    let cluster_version = state.cluster_properties("c").unwrap().version;
    let service_version = state.service_properties("s").unwrap().version;

    assert!(sender.publish_json(PropertyKind::Cluster, "c", "{not json").await.is_err());
    assert!(sender
        .publish_json(PropertyKind::Cluster, "c", r#"{"clusterName": "other"}"#)
        .await
        .is_err());

    // Unparsable strategy tuning is only detected at ingestion.
    add(
        &sender,
        PropertyValue::Service(
            ServiceProperties::new("s", "c").with_strategy_property("http.loadBalancer.pointsPerWeight", "many"),
        ),
    )
    .await;
    // An event whose value names a different property.
    sender
        .send(PropertyEvent::initialize(
            PropertyKind::Cluster,
            "c",
            Some(PropertyValue::Cluster(ClusterProperties::new("d"))),
        ))
        .await
        .unwrap();
    sender.flush().await.unwrap();

    assert_eq!(state.cluster_properties("c").unwrap().version, cluster_version);
    assert_eq!(state.service_properties("s").unwrap().version, service_version);
    assert!(state.cluster_properties("d").is_none());

    state.shutdown().await;
}

// ============================================================================
// Test 3: Readers Never See A Torn Generation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rings_always_match_their_generation() {
    let (state, sender) = LoadBalancerState::builder().spawn().unwrap();
    add(&sender, PropertyValue::Cluster(ClusterProperties::new("c"))).await;
    add(
        &sender,
        PropertyValue::Uri(UriProperties::new("c").with_host(uri("http://h0:1/s"), 1.0)),
    )
    .await;
    add(&sender, PropertyValue::Service(ServiceProperties::new("s", "c"))).await;
    sender.flush().await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let state = state.clone();
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut checked = 0u64;
            while !done.load(Ordering::Acquire) {
                let route = state.route("s").unwrap();
                let ring = route.strategy.ring(&route.generation, 0);

                let expected: HashSet<&Uri> = route
                    .generation
                    .hosts_for_partition(0, Some(&route.scheme))
                    .into_iter()
                    .map(|(host, _)| host)
                    .collect();
                let actual: HashSet<&Uri> = ring.hosts().collect();
                assert_eq!(actual, expected, "generation {}", route.generation.version);

                checked += 1;
                tokio::task::yield_now().await;
            }
            checked
        })
    };

    for i in 0..200 {
        let host = uri(&format!("http://h{}:1/s", i % 3));
        let mut uris = UriProperties::new("c").with_host(host, 1.0);
        if i % 2 == 0 {
            uris = uris.with_host(uri("http://stable:1/s"), 1.0);
        }
        add(&sender, PropertyValue::Uri(uris)).await;
        if i % 20 == 0 {
            sender.flush().await.unwrap();
        }
    }
    sender.flush().await.unwrap();
    done.store(true, Ordering::Release);

    let checked = reader.await.unwrap();
    assert!(checked > 0);
    state.shutdown().await;
}

// ============================================================================
// Test 4: Departed Hosts Are Reaped And Banned Hosts Excluded
// ============================================================================

#[tokio::test]
async fn test_membership_changes_reach_rings() {
    let (state, sender) = LoadBalancerState::builder().spawn().unwrap();
    let a = uri("http://a:1/s");
    let b = uri("http://b:1/s");

    add(&sender, PropertyValue::Cluster(ClusterProperties::new("c"))).await;
    add(
        &sender,
        PropertyValue::Uri(UriProperties::new("c").with_host(a.clone(), 1.0).with_host(b.clone(), 1.0)),
    )
    .await;
    add(&sender, PropertyValue::Service(ServiceProperties::new("s", "c"))).await;
    sender.flush().await.unwrap();

    let route = state.route("s").unwrap();
    let ring = route.strategy.ring(&route.generation, 0);
    assert_eq!(ring.host_count(), 2);
    assert!(route.strategy.tracker(&b).is_some());

    // b leaves: its degrader state goes with it.
    add(&sender, PropertyValue::Uri(UriProperties::new("c").with_host(a.clone(), 1.0))).await;
    sender.flush().await.unwrap();
    let route = state.route("s").unwrap();
    assert_eq!(route.strategy.ring(&route.generation, 0).hosts().collect::<Vec<_>>(), vec![&a]);
    assert!(route.strategy.tracker(&b).is_none());

    // b comes back banned.
    add(&sender, PropertyValue::Cluster(ClusterProperties::new("c").with_banned(b.clone()))).await;
    add(
        &sender,
        PropertyValue::Uri(UriProperties::new("c").with_host(a.clone(), 1.0).with_host(b.clone(), 1.0)),
    )
    .await;
    sender.flush().await.unwrap();
    let route = state.route("s").unwrap();
    assert_eq!(route.strategy.ring(&route.generation, 0).host_count(), 1);

    // Zero weight removes a host from routing entirely.
    add(&sender, PropertyValue::Cluster(ClusterProperties::new("c"))).await;
    add(
        &sender,
        PropertyValue::Uri(UriProperties::new("c").with_host(a.clone(), 0.0).with_host(b.clone(), 1.0)),
    )
    .await;
    sender.flush().await.unwrap();
    let route = state.route("s").unwrap();
    let ring = route.strategy.ring(&route.generation, 0);
    assert_eq!(ring.point_count(&a), 0);
    assert!(ring.point_count(&b) > 0);

    state.shutdown().await;
}

#[tokio::test]
async fn test_service_removal_makes_it_unavailable() {
    let (state, sender) = LoadBalancerState::builder().spawn().unwrap();
    add(&sender, PropertyValue::Cluster(ClusterProperties::new("c"))).await;
    add(&sender, PropertyValue::Service(ServiceProperties::new("s", "c"))).await;
    sender.flush().await.unwrap();
    assert!(state.route("s").is_ok());

    sender
        .send(PropertyEvent::remove(PropertyKind::Service, "s"))
        .await
        .unwrap();
    sender.flush().await.unwrap();
    assert!(matches!(state.route("s"), Err(RouteError::ServiceUnavailable(_))));
    assert!(state.strategy("s", "http").is_none());

    state.shutdown().await;
}

// ============================================================================
// Test 5: Shutdown
// ============================================================================

#[tokio::test]
async fn test_lookups_survive_shutdown() {
    let (state, sender) = LoadBalancerState::builder().spawn().unwrap();
    add(&sender, PropertyValue::Cluster(ClusterProperties::new("c"))).await;
    add(
        &sender,
        PropertyValue::Uri(UriProperties::new("c").with_host(uri("http://a:1/s"), 1.0)),
    )
    .await;
    add(&sender, PropertyValue::Service(ServiceProperties::new("s", "c"))).await;
    sender.flush().await.unwrap();
    let route = state.route("s").unwrap();
    route.strategy.ring(&route.generation, 0);

    state.shutdown().await;

    assert!(matches!(
        sender.send(PropertyEvent::add(PropertyValue::Cluster(ClusterProperties::new("x")))).await,
        Err(RouteError::ShutDown)
    ));
    assert!(matches!(state.listen_to_service("s", || {}), Err(RouteError::ShutDown)));

    // In-flight work completes against the last published state.
    let route = state.route("s").unwrap();
    let ring = route.strategy.ring(&route.generation, 0);
    assert_eq!(ring.get(12345), Some(&uri("http://a:1/s")));
}
