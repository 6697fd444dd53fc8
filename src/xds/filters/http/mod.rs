//! HTTP filter patch framework
//!
//! Every policy filter implements [`HttpFilterPatch`]. For each route carrying
//! its policy, a plugin appends a disabled filter entry named
//! `{filterType}_{ownerRouteName}` to the connection manager and then enables
//! that entry on the matching Envoy routes through `typed_per_filter_config`.
//!
//! Plugins run in [`registry`] order, which fixes the HTTP filter execution
//! order in the proxy. Every patch step is idempotent.

pub mod basic_auth;
pub mod jwt_auth;
pub mod local_rate_limit;

use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::{FilterConfig, Route};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router as RouterFilter;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType as HttpFilterConfigType;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    HttpConnectionManager, HttpFilter,
};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use tracing::debug;

use crate::errors::{Error, Result};
use crate::ir::{HttpListener, HttpRoute, Policy, PolicyKind};
use crate::xds::filters::any_from_message;
use crate::xds::helpers::ListenerModifier;
use crate::xds::naming;
use crate::xds::resources::ResourceTable;
use crate::xds::route::RouteSet;

pub use basic_auth::BasicAuthFilter;
pub use jwt_auth::JwtAuthFilter;
pub use local_rate_limit::LocalRateLimitFilter;

/// Envoy's canonical router filter name
pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
pub const FILTER_CONFIG_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.FilterConfig";

/// Contract shared by all policy filters.
///
/// Implementors supply the filter type, the policy kind they react to and a
/// builder for the filter config. The three patch steps have default
/// implementations that most filters keep.
pub trait HttpFilterPatch: Sync {
    /// Envoy filter name, also the prefix of every per-route entry
    fn filter_type(&self) -> &'static str;

    fn policy_kind(&self) -> PolicyKind;

    /// Filter config for one route's policy attachment
    fn build_config(&self, route: &HttpRoute<'_>, policy: &Policy) -> Result<EnvoyAny>;

    /// Append one disabled entry per route carrying the policy, skipping names
    /// already present. Build failures are collected; remaining routes still run.
    fn patch_hcm(&self, hcm: &mut HttpConnectionManager, listener: &HttpListener) -> Result<()> {
        let mut errors = Vec::new();

        for route in listener.routes() {
            let Some(policy) = route.policy(self.policy_kind()) else {
                continue;
            };
            let owner = route.name();
            let name = naming::per_route_filter_name(self.filter_type(), &owner);
            if has_filter(hcm, &name) {
                continue;
            }

            match self.build_config(&route, policy) {
                Ok(config) => {
                    insert_before_router(
                        hcm,
                        HttpFilter {
                            name,
                            config_type: Some(HttpFilterConfigType::TypedConfig(config)),
                            is_optional: false,
                            disabled: true,
                        },
                    );
                }
                Err(error) => {
                    errors.push(Error::filter_build(self.filter_type(), owner, error.to_string()));
                }
            }
        }

        match Error::join(errors) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Enable this filter's entry on `route` when the IR route carries the
    /// policy; no-op otherwise.
    fn patch_route(&self, route: &mut Route, ir_route: &HttpRoute<'_>) -> Result<()> {
        if ir_route.policy(self.policy_kind()).is_none() {
            return Ok(());
        }
        let name = naming::per_route_filter_name(self.filter_type(), &ir_route.name());
        enable_filter_on_route(route, &name);
        Ok(())
    }

    /// Register supporting resources. Most filters need none.
    fn patch_resources(&self, _table: &mut ResourceTable, _listener: &HttpListener) -> Result<()> {
        Ok(())
    }
}

static REGISTRY: &[&dyn HttpFilterPatch] =
    &[&BasicAuthFilter, &JwtAuthFilter, &LocalRateLimitFilter];

/// Registered filters in execution order
pub fn registry() -> &'static [&'static dyn HttpFilterPatch] {
    REGISTRY
}

pub fn has_filter(hcm: &HttpConnectionManager, name: &str) -> bool {
    hcm.http_filters.iter().any(|f| f.name == name)
}

/// Insert `filter` just before the router, or at the end when no router exists.
pub fn insert_before_router(hcm: &mut HttpConnectionManager, filter: HttpFilter) {
    let router_pos = hcm
        .http_filters
        .iter()
        .position(|f| f.name == ROUTER_FILTER_NAME)
        .unwrap_or(hcm.http_filters.len());

    hcm.http_filters.insert(router_pos, filter);
}

/// Turn on a listener-level filter for one route. Returns `false` if an
/// override under `filter_name` already exists.
pub fn enable_filter_on_route(route: &mut Route, filter_name: &str) -> bool {
    if route.typed_per_filter_config.contains_key(filter_name) {
        return false;
    }
    route.typed_per_filter_config.insert(
        filter_name.to_string(),
        any_from_message(FILTER_CONFIG_TYPE_URL, &FilterConfig::default()),
    );
    true
}

pub fn default_router_filter() -> HttpFilter {
    HttpFilter {
        name: ROUTER_FILTER_NAME.to_string(),
        is_optional: false,
        disabled: false,
        config_type: Some(HttpFilterConfigType::TypedConfig(any_from_message(
            ROUTER_TYPE_URL,
            &RouterFilter::default(),
        ))),
    }
}

/// Run every registered filter's connection manager patch.
///
/// Listeners whose rules or APIs share generated names are rejected before
/// anything is inserted.
pub fn patch_hcm(hcm: &mut HttpConnectionManager, listener: Option<&HttpListener>) -> Result<()> {
    let listener = listener.ok_or_else(|| Error::invalid_input("listener IR is absent"))?;
    listener.check_identities()?;

    let errors: Vec<Error> =
        registry().iter().filter_map(|filter| filter.patch_hcm(hcm, listener).err()).collect();

    debug!(
        listener = %listener.name,
        filters = hcm.http_filters.len(),
        "Patched connection manager"
    );
    match Error::join(errors) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Patch every connection manager of an Envoy listener. Fails if it has none.
pub fn patch_listener(listener: &mut Listener, ir: Option<&HttpListener>) -> Result<usize> {
    let ir = ir.ok_or_else(|| Error::invalid_input("listener IR is absent"))?;
    ir.check_identities()?;

    let mut modifier = ListenerModifier::new(std::mem::take(listener));
    if modifier.hcm_count() == 0 {
        let name = modifier.name().to_string();
        *listener = modifier.into_listener();
        return Err(Error::invalid_input(format!(
            "listener '{}' has no HTTP connection manager",
            name
        )));
    }

    let mut errors = Vec::new();
    let patched = modifier.for_each_hcm(|hcm, _| {
        let before = hcm.clone();
        if let Err(error) = patch_hcm(hcm, Some(ir)) {
            errors.push(error);
        }
        Ok(*hcm != before)
    });
    *listener = modifier.into_listener();

    let patched = patched?;
    match Error::join(errors) {
        Some(error) => Err(error),
        None => Ok(patched),
    }
}

/// Enable filters on every synthesized route according to its IR origin.
pub fn patch_routes(routes: &mut RouteSet, listener: &HttpListener) -> Result<()> {
    let mut errors = Vec::new();

    for (route, origin) in routes.iter_mut() {
        let Some(ir_route) = listener.route(origin.api_index, origin.rule_index) else {
            errors.push(Error::invalid_input(format!(
                "route '{}' has no matching IR rule (api {}, rule {})",
                route.name, origin.api_index, origin.rule_index
            )));
            continue;
        };

        for filter in registry() {
            if let Err(error) = filter.patch_route(route, &ir_route) {
                errors.push(error);
            }
        }
    }

    match Error::join(errors) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Let every registered filter add its supporting resources.
pub fn patch_resources(table: &mut ResourceTable, listener: &HttpListener) -> Result<()> {
    let errors: Vec<Error> = registry()
        .iter()
        .filter_map(|filter| filter.patch_resources(table, listener).err())
        .collect();

    match Error::join(errors) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
