//! Basic authentication filter plugin

use envoy_types::pb::envoy::config::core::v3::{data_source, DataSource};
use envoy_types::pb::envoy::extensions::filters::http::basic_auth::v3::BasicAuth;
use envoy_types::pb::google::protobuf::Any as EnvoyAny;

use super::HttpFilterPatch;
use crate::ir::{BasicAuthPolicy, HttpRoute, Policy, PolicyKind};
use crate::xds::filters::{any_from_message, invalid_config};

pub const BASIC_AUTH_FILTER_NAME: &str = "envoy.filters.http.basic_auth";
pub const BASIC_AUTH_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.basic_auth.v3.BasicAuth";

/// Envoy only accepts SHA1 htpasswd entries
const SHA_PREFIX: &str = "{SHA}";

/// Checks the htpasswd payload of a basic auth policy.
fn validate(policy: &BasicAuthPolicy) -> Result<(), crate::Error> {
    let users = std::str::from_utf8(policy.users.as_slice())
        .map_err(|_| invalid_config("BasicAuth users must be valid UTF-8"))?;

    let mut count = 0;
    for (line_no, line) in users.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (user, hash) = line.split_once(':').ok_or_else(|| {
            invalid_config(format!("BasicAuth users line {} is missing ':'", line_no + 1))
        })?;
        if user.is_empty() {
            return Err(invalid_config(format!(
                "BasicAuth users line {} has an empty user name",
                line_no + 1
            )));
        }
        match hash.strip_prefix(SHA_PREFIX) {
            Some(digest) if !digest.is_empty() => count += 1,
            _ => {
                return Err(invalid_config(format!(
                    "BasicAuth user '{}' must use a {{SHA}} hash",
                    user
                )))
            }
        }
    }

    if count == 0 {
        return Err(invalid_config("BasicAuth requires at least one user"));
    }
    Ok(())
}

/// Build the Envoy `BasicAuth` filter config with the users inlined.
pub fn basic_auth_any(policy: &BasicAuthPolicy) -> Result<EnvoyAny, crate::Error> {
    validate(policy)?;

    let proto = BasicAuth {
        users: Some(DataSource {
            specifier: Some(data_source::Specifier::InlineBytes(policy.users.0.clone())),
            ..Default::default()
        }),
        forward_username_header: policy.forward_username_header.clone().unwrap_or_default(),
        ..Default::default()
    };

    Ok(any_from_message(BASIC_AUTH_TYPE_URL, &proto))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BasicAuthFilter;

impl HttpFilterPatch for BasicAuthFilter {
    fn filter_type(&self) -> &'static str {
        BASIC_AUTH_FILTER_NAME
    }

    fn policy_kind(&self) -> PolicyKind {
        PolicyKind::BasicAuth
    }

    fn build_config(&self, _route: &HttpRoute<'_>, policy: &Policy) -> crate::Result<EnvoyAny> {
        match policy {
            Policy::BasicAuth(basic) => basic_auth_any(basic),
            other => Err(crate::Error::internal(format!(
                "basic auth filter received {:?} policy",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    const USERS: &str = "user1:{SHA}tESsBmE/yNY3lb6a0L6vVQEZNqw=\nuser2:{SHA}EJ9LPFDXsN9ynSmbxvjp75Bmlx8=\n";

    #[test]
    fn builds_inline_users() {
        let any = basic_auth_any(&BasicAuthPolicy::from_htpasswd(USERS)).expect("config");
        assert_eq!(any.type_url, BASIC_AUTH_TYPE_URL);

        let decoded = BasicAuth::decode(any.value.as_slice()).expect("decode");
        match decoded.users.and_then(|ds| ds.specifier) {
            Some(data_source::Specifier::InlineBytes(bytes)) => {
                assert_eq!(bytes, USERS.as_bytes())
            }
            other => panic!("unexpected users source {:?}", other),
        }
        assert!(decoded.forward_username_header.is_empty());
    }

    #[test]
    fn forwards_username_header() {
        let mut policy = BasicAuthPolicy::from_htpasswd(USERS);
        policy.forward_username_header = Some("x-user".into());
        let any = basic_auth_any(&policy).unwrap();
        let decoded = BasicAuth::decode(any.value.as_slice()).unwrap();
        assert_eq!(decoded.forward_username_header, "x-user");
    }

    #[test]
    fn rejects_bad_htpasswd() {
        for users in ["", "\n\n", "user1", ":{SHA}abc", "user1:$apr1$abc", "user1:{SHA}"] {
            let err = basic_auth_any(&BasicAuthPolicy::from_htpasswd(users)).unwrap_err();
            assert!(matches!(err, crate::Error::Config { .. }), "{users:?} gave {err}");
        }
    }
}
