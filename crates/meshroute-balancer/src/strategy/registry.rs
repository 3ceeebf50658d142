use std::collections::HashMap;
use std::fmt;

use meshroute_common::error::Result;
use meshroute_common::properties::ServiceProperties;
use tokio::runtime::Handle;

use super::config::StrategyConfig;
use super::degrader::DegraderStrategy;
use super::random::RandomStrategy;
use super::{LoadBalancerStrategy, StrategyImpl};
use crate::degrader::DegraderConfig;

/// Strategy implementations known to the balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Degrader,
    Random,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Degrader => write!(f, "degrader"),
            StrategyKind::Random => write!(f, "random"),
        }
    }
}

#[derive(Debug, Clone)]
struct Registration {
    kind: StrategyKind,
    /// `None` accepts every scheme.
    schemes: Option<Vec<String>>,
}

impl Registration {
    fn supports(&self, scheme: &str) -> bool {
        match &self.schemes {
            Some(schemes) => schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme)),
            None => true,
        }
    }
}

/// Maps the strategy names used in service properties to implementations
/// and the URI schemes they can serve.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Registration>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Registers `name` for the given schemes.
    pub fn register<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        kind: StrategyKind,
        schemes: impl IntoIterator<Item = S>,
    ) -> Self {
        let schemes = schemes.into_iter().map(Into::into).collect();
        self.strategies.insert(
            name.into(),
            Registration {
                kind,
                schemes: Some(schemes),
            },
        );
        self
    }

    /// Registers `name` for every scheme.
    pub fn register_any_scheme(mut self, name: impl Into<String>, kind: StrategyKind) -> Self {
        self.strategies
            .insert(name.into(), Registration { kind, schemes: None });
        self
    }

    /// The implementation behind `name`, if it can serve `scheme`.
    pub fn supports(&self, name: &str, scheme: &str) -> Option<StrategyKind> {
        self.strategies
            .get(name)
            .filter(|registration| registration.supports(scheme))
            .map(|registration| registration.kind)
    }

    /// First name in `names` that can serve `scheme`.
    pub fn select<'a>(&self, names: &'a [String], scheme: &str) -> Option<(&'a str, StrategyKind)> {
        names
            .iter()
            .find_map(|name| self.supports(name, scheme).map(|kind| (name.as_str(), kind)))
    }

    /// Builds the strategy `kind` for one (service, scheme) pair from the
    /// service's strategy and degrader property maps.
    pub fn build(
        &self,
        name: &str,
        kind: StrategyKind,
        service: &ServiceProperties,
        scheme: &str,
        runtime: Handle,
    ) -> Result<LoadBalancerStrategy> {
        let config = StrategyConfig::from_map(&service.load_balancer_strategy_properties)?;
        let imp = match kind {
            StrategyKind::Degrader => {
                let degrader = DegraderConfig::from_map(&service.degrader_properties)?;
                StrategyImpl::Degrader(DegraderStrategy::new(
                    service.service_name.clone(),
                    scheme,
                    config,
                    &degrader,
                    runtime,
                )?)
            }
            StrategyKind::Random => StrategyImpl::Random(RandomStrategy::new(
                service.service_name.clone(),
                Some(scheme.to_string()),
                config,
            )),
        };
        Ok(LoadBalancerStrategy::new(name, imp))
    }
}

impl Default for StrategyRegistry {
    /// `degrader` for http(s) and `random` for any scheme.
    fn default() -> Self {
        Self::new()
            .register("degrader", StrategyKind::Degrader, ["http", "https"])
            .register_any_scheme("random", StrategyKind::Random)
    }
}
