use http::Uri;
use meshroute_common::error::{Result, RouteError};
use meshroute_common::uri::service_name;
use meshroute_metrics::CallCompletion;
use tracing::{debug, trace};

use crate::context::RequestContext;
use crate::state::LoadBalancerState;

/// Where a single request should go.
///
/// Holds the in-flight call guard of the chosen host, if its strategy
/// tracks calls. End it with the call's outcome so the degrader sees it;
/// dropping it abandons the call unrecorded.
#[derive(Debug)]
pub struct ResolvedEndpoint {
    pub service: String,
    /// The chosen host as announced by the cluster.
    pub host: Uri,
    /// The request rewritten onto `host`.
    pub request_uri: Uri,
    pub scheme: String,
    pub partition_id: i32,
    pub completion: Option<CallCompletion>,
}

/// Resolves single requests of the form `d2://service/path?query` to a host.
///
/// This is the hand-off point to a transport: the balancer picks the host
/// and rewrites the URI, the caller opens the connection.
#[derive(Debug, Clone)]
pub struct SimpleLoadBalancer {
    state: LoadBalancerState,
}

impl SimpleLoadBalancer {
    pub fn new(state: LoadBalancerState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &LoadBalancerState {
        &self.state
    }

    /// Picks the host for `request_uri`.
    ///
    /// # Arguments
    /// * `request_uri` - Request addressed to a service, e.g. `d2://articles/items?id=7`
    /// * `ctx` - Per-call hints; a target host skips ring selection
    ///
    /// # Returns
    /// The host, the rewritten request URI and a call guard for the host.
    ///
    /// # Errors
    /// - `RouteError::ServiceUnavailable` when the service cannot be routed,
    ///   the request's partition has no available host, or the call is
    ///   dropped to relieve an overloaded cluster
    /// - `RouteError::Partition` when the request maps to no partition
    pub fn resolve(&self, request_uri: &Uri, ctx: &RequestContext) -> Result<ResolvedEndpoint> {
        let service = service_name(request_uri)?;
        let route = self.state.route(service)?;
        let partition_id = route.generation.accessor.partition_id_for_uri(request_uri)?;
        let (scheme, strategy) = route.for_partition(partition_id);

        // A target host is taken as the full base URI; ring hosts get the
        // service path appended.
        let (host, service_path) = match &ctx.target_host {
            Some(target) => {
                debug!(service, host = %target, "Using target host from request context");
                (target.clone(), "")
            }
            None => {
                if strategy.should_drop_call() {
                    debug!(service, partition_id, "Dropping call to relieve the cluster");
                    return Err(RouteError::ServiceUnavailable(format!(
                        "call to service {} dropped while the cluster is overloaded",
                        service
                    )));
                }
                let ring = strategy.ring(&route.generation, partition_id);
                let hash = strategy.request_hash().hash_uri(request_uri);
                let host = ring.get(hash).cloned().ok_or_else(|| {
                    RouteError::ServiceUnavailable(format!(
                        "no available host in partition {} of service {} for scheme {}",
                        partition_id, service, scheme
                    ))
                })?;
                (host, route.service.property.path.as_str())
            }
        };

        let rewritten = rewrite_uri(&host, service_path, request_uri)?;
        let completion = strategy.tracker(&host).map(|tracker| tracker.start_call());
        trace!(service, partition_id, host = %host, "Resolved {}", request_uri);

        Ok(ResolvedEndpoint {
            service: service.to_string(),
            host,
            request_uri: rewritten,
            scheme: scheme.to_string(),
            partition_id,
            completion,
        })
    }
}

/// Moves the path and query of `request` onto `host`.
///
/// The request path goes after any path the host announced followed by
/// `service_path`, so `http://a:1/ctx` with service path `/articles` and
/// request `d2://articles/items` becomes `http://a:1/ctx/articles/items`.
pub fn rewrite_uri(host: &Uri, service_path: &str, request: &Uri) -> Result<Uri> {
    let mut rewritten = String::new();
    if let Some(scheme) = host.scheme_str() {
        rewritten.push_str(scheme);
        rewritten.push_str("://");
    }
    if let Some(authority) = host.authority() {
        rewritten.push_str(authority.as_str());
    }
    let mut base = host.path().trim_end_matches('/').to_string();
    let service_path = service_path.trim_matches('/');
    if !service_path.is_empty() {
        base.push('/');
        base.push_str(service_path);
    }
    rewritten.push_str(&base);

    match request.path() {
        "" | "/" if base.is_empty() => rewritten.push('/'),
        "" | "/" => {}
        path => rewritten.push_str(path),
    }
    if let Some(query) = request.query() {
        rewritten.push('?');
        rewritten.push_str(query);
    }

    Ok(rewritten.parse()?)
}
