use cot_relay::auth::{authenticate, build_allowed_key_set};
use cot_relay::config::{AppConfig, ClientAuthConfig};
use cot_relay::error::RelayError;
use http::HeaderMap;

fn config_with_keys(keys: Vec<&str>) -> AppConfig {
    AppConfig {
        client_authentication: ClientAuthConfig {
            allowed_keys: keys.into_iter().map(ToString::to_string).collect(),
        },
        ..AppConfig::default()
    }
}

#[test]
fn test_auth_bearer_success() {
    let allowed = build_allowed_key_set(&config_with_keys(vec!["client-key"]));
    let mut headers = HeaderMap::new();
    headers.insert(
        "authorization",
        "Bearer client-key".parse().expect("header"),
    );
    assert!(authenticate(&headers, &allowed).is_ok());
}

#[test]
fn test_auth_non_bearer_scheme_is_error() {
    let allowed = build_allowed_key_set(&config_with_keys(vec!["a", "b"]));
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Basic a".parse().expect("header"));
    let err = authenticate(&headers, &allowed).expect_err("auth should fail");
    assert!(matches!(err, RelayError::Auth(_)));
}

#[test]
fn test_auth_missing_key_is_error() {
    let allowed = build_allowed_key_set(&config_with_keys(vec!["client-key"]));
    let headers = HeaderMap::new();
    let err = authenticate(&headers, &allowed).expect_err("auth should fail");
    assert!(matches!(err, RelayError::Auth(_)));
}

#[test]
fn test_auth_open_without_configured_keys() {
    let allowed = build_allowed_key_set(&config_with_keys(Vec::new()));
    assert!(authenticate(&HeaderMap::new(), &allowed).is_ok());
}
