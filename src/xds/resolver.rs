//! Host resolution strategy injected into cluster synthesis.
//!
//! The synthesizer never looks up DNS or cluster membership itself; callers
//! pass a [`HostResolver`] per translation pass.

use crate::errors::Result;
use crate::ir::BackendRef;

/// Turns a backend reference into a routable host string
pub trait HostResolver: Sync {
    fn resolve(&self, backend: &BackendRef, default_namespace: &str) -> Result<String>;
}

impl<F> HostResolver for F
where
    F: Fn(&BackendRef, &str) -> Result<String> + Sync,
{
    fn resolve(&self, backend: &BackendRef, default_namespace: &str) -> Result<String> {
        self(backend, default_namespace)
    }
}

/// Kubernetes service DNS: `{name}.{namespace}`, optionally suffixed with
/// `.svc.{cluster_domain}`.
#[derive(Debug, Clone, Default)]
pub struct ServiceDnsResolver {
    pub cluster_domain: Option<String>,
}

impl ServiceDnsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster_domain(domain: impl Into<String>) -> Self {
        Self { cluster_domain: Some(domain.into()) }
    }
}

impl HostResolver for ServiceDnsResolver {
    fn resolve(&self, backend: &BackendRef, default_namespace: &str) -> Result<String> {
        let namespace = backend.namespace_or(default_namespace);
        Ok(match &self.cluster_domain {
            Some(domain) => format!("{}.{}.svc.{}", backend.name, namespace, domain),
            None => format!("{}.{}", backend.name, namespace),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn service_dns_uses_default_namespace() {
        let resolver = ServiceDnsResolver::new();
        let host = resolver.resolve(&BackendRef::new("order-service", 80), "default").unwrap();
        assert_eq!(host, "order-service.default");

        let scoped = BackendRef::new("order-service", 80).with_namespace("shop");
        assert_eq!(resolver.resolve(&scoped, "default").unwrap(), "order-service.shop");
    }

    #[test]
    fn service_dns_with_cluster_domain() {
        let resolver = ServiceDnsResolver::with_cluster_domain("cluster.local");
        let host = resolver.resolve(&BackendRef::new("users", 8080), "apps").unwrap();
        assert_eq!(host, "users.apps.svc.cluster.local");
    }

    #[test]
    fn closures_are_resolvers() {
        let resolver = |backend: &BackendRef, _: &str| -> Result<String> {
            if backend.name == "missing" {
                Err(Error::internal("no such service"))
            } else {
                Ok("10.0.0.1".to_string())
            }
        };

        assert_eq!(resolver.resolve(&BackendRef::new("a", 80), "default").unwrap(), "10.0.0.1");
        assert!(resolver.resolve(&BackendRef::new("missing", 80), "default").is_err());
    }
}
