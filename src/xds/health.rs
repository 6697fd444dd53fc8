//! Fixed liveness route answered directly by the proxy.

use envoy_types::pb::envoy::config::core::v3::{data_source, DataSource};
use envoy_types::pb::envoy::config::route::v3::{
    route, route_match::PathSpecifier, DirectResponseAction, Route, RouteMatch,
};

pub const HEALTH_PATH: &str = "/health";
pub const HEALTH_BODY: &str = r#"{"status": "healthy"}"#;
pub const HEALTH_STATUS: u32 = 200;

/// Route named `/health` returning a static JSON body; no cluster involved.
pub fn health_route() -> Route {
    Route {
        name: HEALTH_PATH.to_string(),
        r#match: Some(RouteMatch {
            path_specifier: Some(PathSpecifier::Path(HEALTH_PATH.to_string())),
            ..Default::default()
        }),
        action: Some(route::Action::DirectResponse(DirectResponseAction {
            status: HEALTH_STATUS,
            body: Some(DataSource {
                specifier: Some(data_source::Specifier::InlineString(HEALTH_BODY.to_string())),
                ..Default::default()
            }),
            ..Default::default()
        })),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_route_is_fixed() {
        let route = health_route();
        assert_eq!(route.name, "/health");
        assert_eq!(
            route.r#match.unwrap().path_specifier,
            Some(PathSpecifier::Path("/health".to_string()))
        );

        match route.action {
            Some(route::Action::DirectResponse(direct)) => {
                assert_eq!(direct.status, 200);
                assert_eq!(
                    direct.body.and_then(|b| b.specifier),
                    Some(data_source::Specifier::InlineString(
                        "{\"status\": \"healthy\"}".to_string()
                    ))
                );
            }
            other => panic!("expected direct response, got {:?}", other),
        }
    }

    #[test]
    fn health_route_is_deterministic() {
        assert_eq!(health_route(), health_route());
    }
}
