//! Envoy resource synthesis
//!
//! Turns listener IR into Envoy clusters, routes and virtual hosts, then runs
//! the HTTP filter patch plugins over the connection manager and routes.

pub mod cluster;
pub mod filters;
pub mod health;
pub mod helpers;
pub mod naming;
pub mod resolver;
pub mod resources;
pub mod route;
pub mod translator;

pub use cluster::{ClusterSynthesizer, ClusterTarget};
pub use filters::http::{registry, HttpFilterPatch};
pub use health::health_route;
pub use resolver::{HostResolver, ServiceDnsResolver};
pub use resources::{BuiltResource, ResourceTable};
pub use route::{RouteOrigin, RouteSet, RouteSynthesizer};
pub use translator::{Translation, Translator};
