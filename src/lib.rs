//! # Routeplane
//!
//! Translation core of an API-gateway control plane. It turns an intermediate
//! representation of gateway listeners and their APIs into Envoy xDS
//! resources:
//!
//! - **Clusters**: one per API and stage, plus one per rule with its own
//!   backends, with failover tiers expressed as endpoint priorities
//! - **Routes**: segment-aware regex path matching, rewrites and header
//!   modifiers, grouped into per-stage virtual hosts
//! - **Filter patches**: policy plugins (basic auth, JWT, local rate limit)
//!   that add per-route filters to the HTTP connection manager
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use routeplane::config::TranslatorConfig;
//! use routeplane::ir::HttpListener;
//! use routeplane::xds::{ServiceDnsResolver, Translator};
//!
//! fn main() -> routeplane::Result<()> {
//!     let config = TranslatorConfig::load(None)?;
//!     routeplane::observability::init_logging(&config.logging)?;
//!
//!     let listener = HttpListener::from_yaml(&std::fs::read_to_string("listener.yaml")?)?;
//!     let resolver = ServiceDnsResolver::new();
//!     let translation = Translator::new(&config, &resolver).translate(&listener).into_result()?;
//!     println!("{} clusters", translation.clusters.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod errors;
pub mod ir;
pub mod observability;
pub mod xds;

pub use errors::{Error, Partial, Result};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
