//! One translation pass from listener IR to Envoy resources.
//!
//! Cluster and route synthesis only read the IR and run side by side on scoped
//! threads. Filter patching follows sequentially in registry order.

use std::thread;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::{RouteConfiguration, VirtualHost};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpConnectionManager;
use tracing::{debug, info, warn};

use crate::config::TranslatorConfig;
use crate::errors::{Error, Partial, Result};
use crate::ir::HttpListener;
use crate::translation_span;
use crate::xds::cluster::ClusterSynthesizer;
use crate::xds::filters::http;
use crate::xds::health::health_route;
use crate::xds::resolver::HostResolver;
use crate::xds::resources::ResourceTable;
use crate::xds::route::{RouteSet, RouteSynthesizer};

/// Everything produced for one listener
#[derive(Debug, Clone, Default)]
pub struct Translation {
    pub clusters: Vec<Cluster>,
    pub routes: RouteSet,
    pub virtual_hosts: Vec<VirtualHost>,
    /// Supporting resources registered by filter plugins
    pub resources: ResourceTable,
}

impl Translation {
    /// Route configuration holding the per-stage virtual hosts
    pub fn route_configuration(&self, name: impl Into<String>) -> RouteConfiguration {
        RouteConfiguration {
            name: name.into(),
            virtual_hosts: self.virtual_hosts.clone(),
            ..Default::default()
        }
    }

    /// Synthesized clusters followed by auxiliary ones, deduplicated by name
    pub fn all_clusters(&self) -> Vec<Cluster> {
        let mut clusters = self.clusters.clone();
        for cluster in self.resources.clusters() {
            if !clusters.iter().any(|existing| existing.name == cluster.name) {
                clusters.push(cluster);
            }
        }
        clusters
    }
}

pub struct Translator<'a> {
    config: &'a TranslatorConfig,
    resolver: &'a dyn HostResolver,
}

impl<'a> Translator<'a> {
    pub fn new(config: &'a TranslatorConfig, resolver: &'a dyn HostResolver) -> Self {
        Self { config, resolver }
    }

    /// Clusters, routes, auxiliary resources and virtual hosts for `listener`.
    ///
    /// Route-level filter enablement is applied here; the connection manager
    /// side is left to [`Translator::apply_filters`].
    pub fn translate(&self, listener: &HttpListener) -> Partial<Translation> {
        let span = translation_span!("translate", listener.name, apis = listener.apis.len());
        let _guard = span.enter();

        let mut result = Partial::new(Translation::default());
        if let Err(error) = listener.check_identities() {
            result.push_error(error);
        }

        let clusters = ClusterSynthesizer::new(self.config, self.resolver);
        let routes = RouteSynthesizer::new(self.config);
        let (cluster_pass, route_pass) = thread::scope(|scope| {
            let cluster_handle = scope.spawn(|| clusters.synthesize(listener));
            let route_pass = routes.synthesize(listener);
            (join_pass(cluster_handle.join(), "cluster"), route_pass)
        });

        result.value.clusters = result.absorb(cluster_pass);
        result.value.routes = result.absorb(route_pass);

        if let Err(error) = http::patch_routes(&mut result.value.routes, listener) {
            result.push_error(error);
        }
        if let Err(error) = http::patch_resources(&mut result.value.resources, listener) {
            result.push_error(error);
        }

        let health = self.config.health_route.then(health_route);
        result.value.virtual_hosts =
            routes.virtual_hosts(listener, &result.value.routes, health.as_ref());

        if result.is_complete() {
            info!(
                clusters = result.value.clusters.len(),
                routes = result.value.routes.len(),
                resources = result.value.resources.len(),
                "Translated listener"
            );
        } else {
            warn!(errors = result.errors.len(), "Translated listener with errors");
        }
        result
    }

    /// Patch a connection manager with one filter entry per policy attachment.
    pub fn apply_filters(
        &self,
        hcm: &mut HttpConnectionManager,
        listener: &HttpListener,
    ) -> Result<()> {
        http::patch_hcm(hcm, Some(listener))
    }

    /// [`Translator::translate`] plus connection manager patching
    pub fn translate_hcm(
        &self,
        listener: &HttpListener,
        hcm: &mut HttpConnectionManager,
    ) -> Partial<Translation> {
        let mut result = self.translate(listener);
        if let Err(error) = self.apply_filters(hcm, listener) {
            result.push_error(error);
        }
        result
    }

    /// [`Translator::translate`] plus patching of every connection manager
    /// embedded in an Envoy listener.
    pub fn translate_listener(
        &self,
        listener: &HttpListener,
        envoy_listener: &mut Listener,
    ) -> Partial<Translation> {
        let mut result = self.translate(listener);
        match http::patch_listener(envoy_listener, Some(listener)) {
            Ok(patched) => debug!(listener = %envoy_listener.name, patched, "Patched listener"),
            Err(error) => result.push_error(error),
        }
        result
    }
}

fn join_pass<T: Default>(joined: thread::Result<Partial<T>>, pass: &str) -> Partial<T> {
    match joined {
        Ok(partial) => partial,
        Err(_) => Partial::with_errors(
            T::default(),
            vec![Error::internal(format!("{} synthesis thread panicked", pass))],
        ),
    }
}
