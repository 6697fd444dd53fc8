//! Cluster synthesis using envoy-types
//!
//! Groups the backend references of an API into Envoy clusters. Each backend
//! becomes its own priority group carrying an explicit `priority` equal to its
//! failover tier, so failover is visible in the generated config rather than
//! inferred by the proxy.

use std::collections::HashSet;
use std::net::IpAddr;

use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    common_lb_config::{LocalityConfigSpecifier, LocalityWeightedLbConfig},
    ClusterDiscoveryType, CommonLbConfig, DiscoveryType, LbPolicy,
};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address, Address, SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::google::protobuf::{Duration, UInt32Value};
use tracing::{debug, warn};

use crate::config::TranslatorConfig;
use crate::errors::{Error, Partial};
use crate::ir::{Api, BackendRef, BackendSet, HttpListener, RouteRule, Stage};
use crate::xds::naming;
use crate::xds::resolver::HostResolver;

/// Cluster a (rule, stage) pair routes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTarget<'a> {
    pub name: String,
    pub backends: &'a BackendSet,
    /// Shared API-level cluster rather than one owned by the rule
    pub api_level: bool,
}

/// API-level cluster target for a stage, if the API declares backends for it
pub fn api_cluster_target<'a>(
    config: &TranslatorConfig,
    api: &'a Api,
    stage: Stage,
) -> Option<ClusterTarget<'a>> {
    let backends = api.backends.for_stage(stage);
    if backends.is_empty() {
        return None;
    }
    Some(ClusterTarget {
        name: naming::cluster_name(&config.tenant, stage, config.listener_host(stage), api, None),
        backends,
        api_level: true,
    })
}

/// Cluster a rule routes to for `stage`.
///
/// A rule whose effective backend set equals the API-level set shares the
/// API-level cluster. `None` means the stage has no backends for this rule.
pub fn rule_cluster_target<'a>(
    config: &TranslatorConfig,
    api: &'a Api,
    rule: &'a RouteRule,
    rule_index: usize,
    stage: Stage,
) -> Option<ClusterTarget<'a>> {
    let backends = api.effective_backends(rule, stage);
    if backends.is_empty() {
        return None;
    }
    if backends == api.backends.for_stage(stage) {
        return api_cluster_target(config, api, stage);
    }

    let discriminator = naming::rule_discriminator(rule, rule_index);
    Some(ClusterTarget {
        name: naming::cluster_name(
            &config.tenant,
            stage,
            config.listener_host(stage),
            api,
            Some(&discriminator),
        ),
        backends,
        api_level: false,
    })
}

/// Builds Envoy clusters from the IR.
pub struct ClusterSynthesizer<'a> {
    config: &'a TranslatorConfig,
    resolver: &'a dyn HostResolver,
}

impl<'a> ClusterSynthesizer<'a> {
    pub fn new(config: &'a TranslatorConfig, resolver: &'a dyn HostResolver) -> Self {
        Self { config, resolver }
    }

    /// Clusters for every API on the listener, in API order
    pub fn synthesize(&self, listener: &HttpListener) -> Partial<Vec<Cluster>> {
        let mut result = Partial::new(Vec::new());
        let mut seen = HashSet::new();
        for api in &listener.apis {
            let clusters = result.absorb(self.synthesize_api(api));
            for cluster in clusters {
                if seen.insert(cluster.name.clone()) {
                    result.value.push(cluster);
                } else {
                    warn!(
                        cluster = %cluster.name,
                        listener = %listener.name,
                        "Duplicate cluster name across APIs, keeping first"
                    );
                }
            }
        }
        result
    }

    /// API-level clusters first (production, then sandbox), then one cluster
    /// per rule and stage that declares its own backends, in rule order.
    pub fn synthesize_api(&self, api: &Api) -> Partial<Vec<Cluster>> {
        let mut result = Partial::new(Vec::new());
        let mut seen = HashSet::new();

        for stage in Stage::ALL {
            if let Some(target) = api_cluster_target(self.config, api, stage) {
                seen.insert(target.name.clone());
                let cluster = result.absorb(self.build_cluster(&target.name, target.backends));
                result.value.push(cluster);
            }
        }

        for (index, rule) in api.rules.iter().enumerate() {
            for stage in Stage::ALL {
                let Some(target) = rule_cluster_target(self.config, api, rule, index, stage) else {
                    continue;
                };
                if target.api_level || !seen.insert(target.name.clone()) {
                    continue;
                }
                let cluster = result.absorb(self.build_cluster(&target.name, target.backends));
                result.value.push(cluster);
            }
        }

        debug!(
            api = %api.name,
            clusters = result.value.len(),
            errors = result.errors.len(),
            "Synthesized clusters"
        );
        result
    }

    /// One priority group per backend. Unresolvable backends leave their group
    /// empty and record an error.
    pub fn build_cluster(&self, name: &str, backends: &BackendSet) -> Partial<Cluster> {
        let mut errors = Vec::new();
        let mut localities = Vec::new();
        let mut all_ip = true;

        for (tier, backend) in backends.tiers() {
            let lb_endpoints = match self.resolve(backend) {
                Ok(host) => {
                    all_ip &= host.parse::<IpAddr>().is_ok();
                    vec![to_envoy_lb_endpoint(&host, backend)]
                }
                Err(error) => {
                    warn!(
                        cluster = %name,
                        backend = %backend,
                        error = %error,
                        "Backend left without endpoints"
                    );
                    errors.push(error);
                    Vec::new()
                }
            };

            localities.push(LocalityLbEndpoints {
                lb_endpoints,
                load_balancing_weight: Some(UInt32Value { value: backend.effective_weight() }),
                priority: tier,
                ..Default::default()
            });
        }

        let resolved_any = localities.iter().any(|l| !l.lb_endpoints.is_empty());
        let discovery =
            if resolved_any && all_ip { DiscoveryType::Static } else { DiscoveryType::StrictDns };

        let timeout = self.config.connect_timeout();
        let cluster = Cluster {
            name: name.to_string(),
            cluster_discovery_type: Some(ClusterDiscoveryType::Type(discovery as i32)),
            connect_timeout: Some(Duration {
                seconds: timeout.as_secs() as i64,
                nanos: timeout.subsec_nanos() as i32,
            }),
            lb_policy: LbPolicy::RoundRobin as i32,
            common_lb_config: Some(CommonLbConfig {
                locality_config_specifier: Some(LocalityConfigSpecifier::LocalityWeightedLbConfig(
                    LocalityWeightedLbConfig {},
                )),
                ..Default::default()
            }),
            load_assignment: Some(ClusterLoadAssignment {
                cluster_name: name.to_string(),
                endpoints: localities,
                ..Default::default()
            }),
            ..Default::default()
        };

        Partial::with_errors(cluster, errors)
    }

    fn resolve(&self, backend: &BackendRef) -> Result<String, Error> {
        let host = self
            .resolver
            .resolve(backend, &self.config.default_namespace)
            .map_err(|e| Error::resolution(backend.to_string(), e.to_string()))?;
        if host.trim().is_empty() {
            return Err(Error::resolution(backend.to_string(), "resolver returned an empty host"));
        }
        Ok(host)
    }
}

fn to_envoy_lb_endpoint(host: &str, backend: &BackendRef) -> LbEndpoint {
    let socket_address = SocketAddress {
        address: host.to_string(),
        port_specifier: Some(socket_address::PortSpecifier::PortValue(backend.port)),
        ..Default::default()
    };

    let address = Address { address: Some(AddressType::SocketAddress(socket_address)) };

    LbEndpoint {
        host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
            address: Some(address),
            ..Default::default()
        })),
        load_balancing_weight: Some(UInt32Value { value: backend.effective_weight() }),
        ..Default::default()
    }
}

/// Host and port of every endpoint in a cluster, grouped by priority group
pub fn endpoint_addresses(cluster: &Cluster) -> Vec<Vec<(String, u32)>> {
    let Some(assignment) = &cluster.load_assignment else {
        return Vec::new();
    };
    assignment
        .endpoints
        .iter()
        .map(|locality| {
            locality
                .lb_endpoints
                .iter()
                .filter_map(|lb| match &lb.host_identifier {
                    Some(lb_endpoint::HostIdentifier::Endpoint(endpoint)) => {
                        endpoint.address.as_ref()
                    }
                    _ => None,
                })
                .filter_map(|address| match &address.address {
                    Some(AddressType::SocketAddress(socket)) => match socket.port_specifier {
                        Some(socket_address::PortSpecifier::PortValue(port)) => {
                            Some((socket.address.clone(), port))
                        }
                        _ => None,
                    },
                    _ => None,
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{PathMatch, StageBackends};
    use crate::xds::resolver::ServiceDnsResolver;

    fn api_with_rules(rules: Vec<RouteRule>, backends: StageBackends) -> Api {
        Api {
            name: "test-api".into(),
            namespace: "default".into(),
            display_name: "test-api".into(),
            version: "1.0.0".into(),
            base_path: "/test-api/1.0.0".into(),
            rules,
            backends,
            policies: vec![],
        }
    }

    fn priorities(cluster: &Cluster) -> Vec<u32> {
        cluster.load_assignment.as_ref().unwrap().endpoints.iter().map(|l| l.priority).collect()
    }

    #[test]
    fn api_level_cluster_comes_first() {
        let config = TranslatorConfig::default();
        let resolver = ServiceDnsResolver::new();
        let rule_backends =
            StageBackends::production(BackendSet::new(vec![BackendRef::new("users", 8080)]));
        let api = api_with_rules(
            vec![
                RouteRule::new(vec![PathMatch::prefix("/orders")]),
                RouteRule::new(vec![PathMatch::prefix("/users")]).with_backends(rule_backends),
            ],
            StageBackends::production(BackendSet::new(vec![BackendRef::new("orders", 80)])),
        );

        let result = ClusterSynthesizer::new(&config, &resolver).synthesize_api(&api);
        assert!(result.is_complete());
        let names: Vec<&str> = result.value.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "carbon.super_clusterProd_prod.gw.wso2.com_test-api1.0.0",
                "carbon.super_clusterProd_prod.gw.wso2.com_test-api1.0.0_rule1",
            ]
        );
    }

    #[test]
    fn failover_groups_get_increasing_priority() {
        let config = TranslatorConfig::default();
        let resolver = ServiceDnsResolver::new();
        let synthesizer = ClusterSynthesizer::new(&config, &resolver);
        let set = BackendSet::new(vec![BackendRef::new("a", 80), BackendRef::new("b", 80)])
            .with_failover(vec![BackendRef::new("c", 80)])
            .with_failover(vec![BackendRef::new("d", 80)]);

        let cluster = synthesizer.build_cluster("c1", &set).value;
        assert_eq!(priorities(&cluster), vec![0, 0, 1, 2]);
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32))
        );
    }

    #[test]
    fn weights_default_to_one_and_zero_is_kept() {
        let config = TranslatorConfig::default();
        let resolver = ServiceDnsResolver::new();
        let set = BackendSet::new(vec![
            BackendRef::new("a", 80),
            BackendRef::new("b", 80).with_weight(0),
            BackendRef::new("c", 80).with_weight(5),
        ]);

        let cluster = ClusterSynthesizer::new(&config, &resolver).build_cluster("c", &set).value;
        let weights: Vec<u32> = cluster.load_assignment.unwrap().endpoints[..]
            .iter()
            .map(|l| l.lb_endpoints[0].load_balancing_weight.as_ref().unwrap().value)
            .collect();
        assert_eq!(weights, vec![1, 0, 5]);
    }

    #[test]
    fn resolver_failure_leaves_empty_group_and_continues() {
        let config = TranslatorConfig::default();
        let resolver = |backend: &BackendRef, _: &str| -> crate::Result<String> {
            match backend.name.as_str() {
                "broken" => Err(Error::internal("lookup failed")),
                "blank" => Ok(String::new()),
                _ => Ok("10.1.0.7".to_string()),
            }
        };
        let set = BackendSet::new(vec![
            BackendRef::new("ok", 9000),
            BackendRef::new("broken", 9000),
            BackendRef::new("blank", 9000),
        ]);

        let result = ClusterSynthesizer::new(&config, &resolver).build_cluster("c", &set);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| matches!(e, Error::Resolution { .. })));

        let addresses = endpoint_addresses(&result.value);
        assert_eq!(addresses, vec![vec![("10.1.0.7".to_string(), 9000)], vec![], vec![]]);
        assert_eq!(
            result.value.cluster_discovery_type,
            Some(ClusterDiscoveryType::Type(DiscoveryType::Static as i32))
        );
    }

    #[test]
    fn rule_without_backends_inherits_api_cluster() {
        let config = TranslatorConfig::default();
        let api = api_with_rules(
            vec![RouteRule::new(vec![PathMatch::prefix("/a")])],
            StageBackends::production(BackendSet::new(vec![BackendRef::new("svc", 80)])),
        );

        let target = rule_cluster_target(&config, &api, &api.rules[0], 0, Stage::Production)
            .expect("target");
        assert!(target.api_level);
        assert!(rule_cluster_target(&config, &api, &api.rules[0], 0, Stage::Sandbox).is_none());
    }
}
