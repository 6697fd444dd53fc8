//! Local rate limit filter plugin

use envoy_types::pb::envoy::config::core::v3::RuntimeFractionalPercent;
use envoy_types::pb::envoy::extensions::filters::http::local_ratelimit::v3::LocalRateLimit;
use envoy_types::pb::envoy::r#type::v3::{
    fractional_percent, FractionalPercent, HttpStatus, TokenBucket,
};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, Duration as ProtoDuration, UInt32Value};

use super::HttpFilterPatch;
use crate::ir::{HttpRoute, Policy, PolicyKind, RateLimitPolicy};
use crate::xds::filters::{any_from_message, invalid_config};

pub const LOCAL_RATE_LIMIT_FILTER_NAME: &str = "envoy.filters.http.local_ratelimit";
pub const LOCAL_RATE_LIMIT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.local_ratelimit.v3.LocalRateLimit";
const RATE_LIMITED_STATUS: i32 = 429;

/// Envoy only applies the bucket when both fractions are present.
fn full_percent() -> RuntimeFractionalPercent {
    RuntimeFractionalPercent {
        runtime_key: String::new(),
        default_value: Some(FractionalPercent {
            numerator: 100,
            denominator: fractional_percent::DenominatorType::Hundred as i32,
        }),
    }
}

/// Token bucket refilled with `requests_per_unit` tokens once per unit.
fn token_bucket(policy: &RateLimitPolicy) -> Result<TokenBucket, crate::Error> {
    if policy.requests_per_unit == 0 {
        return Err(invalid_config("LocalRateLimit requestsPerUnit must be greater than 0"));
    }

    Ok(TokenBucket {
        max_tokens: policy.requests_per_unit,
        tokens_per_fill: Some(UInt32Value { value: policy.requests_per_unit }),
        fill_interval: Some(ProtoDuration { seconds: policy.unit.seconds(), nanos: 0 }),
    })
}

pub fn local_rate_limit_any(
    stat_prefix: &str,
    policy: &RateLimitPolicy,
) -> Result<EnvoyAny, crate::Error> {
    let proto = LocalRateLimit {
        stat_prefix: stat_prefix.to_string(),
        status: Some(HttpStatus { code: RATE_LIMITED_STATUS }),
        token_bucket: Some(token_bucket(policy)?),
        filter_enabled: Some(full_percent()),
        filter_enforced: Some(full_percent()),
        ..Default::default()
    };

    Ok(any_from_message(LOCAL_RATE_LIMIT_TYPE_URL, &proto))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRateLimitFilter;

impl HttpFilterPatch for LocalRateLimitFilter {
    fn filter_type(&self) -> &'static str {
        LOCAL_RATE_LIMIT_FILTER_NAME
    }

    fn policy_kind(&self) -> PolicyKind {
        PolicyKind::LocalRateLimit
    }

    fn build_config(&self, route: &HttpRoute<'_>, policy: &Policy) -> crate::Result<EnvoyAny> {
        match policy {
            Policy::LocalRateLimit(limit) => {
                let stat_prefix = format!("local_rate_limit_{}", route.name().replace('/', "_"));
                local_rate_limit_any(&stat_prefix, limit)
            }
            other => Err(crate::Error::internal(format!(
                "local rate limit filter received {:?} policy",
                other.kind()
            ))),
        }
    }
}
