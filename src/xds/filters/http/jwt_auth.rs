//! JWT authentication filter plugin
//!
//! Each route carrying a `JwtAuth` policy gets its own `jwt_authn` filter with a
//! single remote provider. The provider fetches keys through a dedicated JWKS
//! cluster, registered once per `host:port` in the auxiliary resource table.

use std::collections::HashMap;

use envoy_types::pb::envoy::config::cluster::v3::cluster::{ClusterDiscoveryType, DiscoveryType};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::transport_socket::ConfigType as TransportSocketConfigType;
use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, http_uri::HttpUpstreamType, socket_address, Address, HttpUri,
    SocketAddress, TransportSocket,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::config::route::v3::{route_match::PathSpecifier, RouteMatch};
use envoy_types::pb::envoy::extensions::filters::http::jwt_authn::v3::requirement_rule::RequirementType;
use envoy_types::pb::envoy::extensions::filters::http::jwt_authn::v3::{
    jwt_provider::JwksSourceSpecifier, jwt_requirement, JwtAuthentication, JwtProvider,
    JwtRequirement, RemoteJwks, RequirementRule,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    CommonTlsContext, UpstreamTlsContext,
};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, Duration as ProtoDuration};
use tracing::debug;
use url::{Host, Url};

use super::HttpFilterPatch;
use crate::errors::Error;
use crate::ir::{HttpListener, HttpRoute, JwtPolicy, Policy, PolicyKind};
use crate::xds::filters::{any_from_message, invalid_config};
use crate::xds::naming;
use crate::xds::resources::ResourceTable;

pub const JWT_AUTHN_FILTER_NAME: &str = "envoy.filters.http.jwt_authn";
pub const JWT_AUTHN_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.jwt_authn.v3.JwtAuthentication";
const UPSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";
const JWKS_CONNECT_TIMEOUT_SECONDS: i64 = 5;

/// Location of a remote key set, split for cluster synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwksEndpoint {
    pub uri: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    host_is_ip: bool,
}

impl JwksEndpoint {
    pub fn parse(uri: &str) -> Result<Self, crate::Error> {
        let url = Url::parse(uri.trim())
            .map_err(|e| invalid_config(format!("JwtAuth jwksUri '{}' is invalid: {}", uri, e)))?;

        let tls = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(invalid_config(format!(
                    "JwtAuth jwksUri scheme '{}' is not supported",
                    other
                )))
            }
        };

        let (host, host_is_ip) = match url.host() {
            Some(Host::Domain(domain)) => (domain.to_string(), false),
            Some(Host::Ipv4(ip)) => (ip.to_string(), true),
            Some(Host::Ipv6(ip)) => (ip.to_string(), true),
            None => return Err(invalid_config(format!("JwtAuth jwksUri '{}' has no host", uri))),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid_config(format!("JwtAuth jwksUri '{}' has no port", uri)))?;

        Ok(Self { uri: url.to_string(), host, port, tls, host_is_ip })
    }

    pub fn cluster_name(&self) -> String {
        naming::jwks_cluster_name(&self.host, self.port)
    }
}

fn millis_to_duration(ms: u64) -> ProtoDuration {
    ProtoDuration { seconds: (ms / 1000) as i64, nanos: ((ms % 1000) * 1_000_000) as i32 }
}

fn provider_proto(policy: &JwtPolicy, endpoint: &JwksEndpoint) -> JwtProvider {
    JwtProvider {
        issuer: policy.issuer.clone(),
        audiences: policy.audiences.clone(),
        forward: policy.forward,
        jwks_source_specifier: Some(JwksSourceSpecifier::RemoteJwks(RemoteJwks {
            http_uri: Some(HttpUri {
                uri: endpoint.uri.clone(),
                timeout: Some(millis_to_duration(policy.jwks_timeout_ms)),
                http_upstream_type: Some(HttpUpstreamType::Cluster(endpoint.cluster_name())),
            }),
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Build a `JwtAuthentication` config requiring `policy.provider` on every
/// request the filter sees.
pub fn jwt_authn_any(policy: &JwtPolicy) -> Result<EnvoyAny, crate::Error> {
    if policy.provider.trim().is_empty() {
        return Err(invalid_config("JwtAuth provider cannot be empty"));
    }
    if policy.issuer.trim().is_empty() {
        return Err(invalid_config("JwtAuth issuer cannot be empty"));
    }
    if policy.jwks_timeout_ms == 0 {
        return Err(invalid_config("JwtAuth jwksTimeoutMs must be greater than 0"));
    }
    let endpoint = JwksEndpoint::parse(&policy.jwks_uri)?;

    let mut providers = HashMap::new();
    providers.insert(policy.provider.clone(), provider_proto(policy, &endpoint));

    let rule = RequirementRule {
        r#match: Some(RouteMatch {
            path_specifier: Some(PathSpecifier::Prefix("/".to_string())),
            ..Default::default()
        }),
        requirement_type: Some(RequirementType::Requires(JwtRequirement {
            requires_type: Some(jwt_requirement::RequiresType::ProviderName(
                policy.provider.clone(),
            )),
        })),
    };

    let proto = JwtAuthentication { providers, rules: vec![rule], ..Default::default() };
    Ok(any_from_message(JWT_AUTHN_TYPE_URL, &proto))
}

/// Cluster serving a JWKS endpoint; TLS with SNI for `https` URIs.
pub fn jwks_cluster(endpoint: &JwksEndpoint) -> Cluster {
    let name = endpoint.cluster_name();
    let discovery =
        if endpoint.host_is_ip { DiscoveryType::Static } else { DiscoveryType::LogicalDns };

    let lb_endpoint = LbEndpoint {
        host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
            address: Some(Address {
                address: Some(AddressType::SocketAddress(SocketAddress {
                    address: endpoint.host.clone(),
                    port_specifier: Some(socket_address::PortSpecifier::PortValue(
                        u32::from(endpoint.port),
                    )),
                    ..Default::default()
                })),
            }),
            ..Default::default()
        })),
        ..Default::default()
    };

    let mut cluster = Cluster {
        name: name.clone(),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(discovery as i32)),
        connect_timeout: Some(ProtoDuration { seconds: JWKS_CONNECT_TIMEOUT_SECONDS, nanos: 0 }),
        load_assignment: Some(ClusterLoadAssignment {
            cluster_name: name,
            endpoints: vec![LocalityLbEndpoints {
                lb_endpoints: vec![lb_endpoint],
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    };

    if endpoint.tls {
        let tls_context = UpstreamTlsContext {
            common_tls_context: Some(CommonTlsContext::default()),
            sni: if endpoint.host_is_ip { String::new() } else { endpoint.host.clone() },
            ..Default::default()
        };
        cluster.transport_socket = Some(TransportSocket {
            name: "envoy.transport_sockets.tls".to_string(),
            config_type: Some(TransportSocketConfigType::TypedConfig(any_from_message(
                UPSTREAM_TLS_TYPE_URL,
                &tls_context,
            ))),
        });
    }

    cluster
}

fn jwt_policy(policy: &Policy) -> Result<&JwtPolicy, crate::Error> {
    match policy {
        Policy::JwtAuth(jwt) => Ok(jwt),
        other => Err(Error::internal(format!("JWT filter received {:?} policy", other.kind()))),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JwtAuthFilter;

impl HttpFilterPatch for JwtAuthFilter {
    fn filter_type(&self) -> &'static str {
        JWT_AUTHN_FILTER_NAME
    }

    fn policy_kind(&self) -> PolicyKind {
        PolicyKind::JwtAuth
    }

    fn build_config(&self, _route: &HttpRoute<'_>, policy: &Policy) -> crate::Result<EnvoyAny> {
        jwt_authn_any(jwt_policy(policy)?)
    }

    fn patch_resources(
        &self,
        table: &mut ResourceTable,
        listener: &HttpListener,
    ) -> crate::Result<()> {
        let mut errors = Vec::new();

        for route in listener.routes() {
            let Some(policy) = route.policy(PolicyKind::JwtAuth) else {
                continue;
            };
            let parsed = jwt_policy(policy).and_then(|jwt| JwksEndpoint::parse(&jwt.jwks_uri));
            let endpoint = match parsed {
                Ok(endpoint) => endpoint,
                Err(error) => {
                    errors.push(Error::filter_build(
                        JWT_AUTHN_FILTER_NAME,
                        route.name(),
                        error.to_string(),
                    ));
                    continue;
                }
            };
            if table.insert_cluster(&jwks_cluster(&endpoint)) {
                debug!(
                    cluster = %endpoint.cluster_name(),
                    route = %route.name(),
                    "Registered JWKS cluster"
                );
            }
        }

        match Error::join(errors) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
