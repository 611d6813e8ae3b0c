//! Credential selection against a mocked build API.

use std::time::Duration;

use lanestep_core::{
    AuthError, AuthSelector, AuthSource, BUILD_API_TOKEN_ENV, BUILD_URL_ENV, BitriseClient,
    ConnectionProvider, DevPortalError,
};
use lanestep_proto::{ConnectionPolicy, Credentials, ManualInputs, MapEnvironment};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PORTAL_DATA: &str = "/build/abc/apple_developer_portal_data.json";

fn client() -> BitriseClient {
    BitriseClient::new()
        .unwrap()
        .with_retry_delay(Duration::from_millis(10))
}

fn env_for(server: &MockServer) -> MapEnvironment {
    MapEnvironment::new()
        .with(BUILD_URL_ENV, format!("{}/build/abc", server.uri()))
        .with(BUILD_API_TOKEN_ENV, "secret-token")
}

#[tokio::test]
async fn test_fetches_connection_with_build_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PORTAL_DATA))
        .and(header("BUILD_API_TOKEN", "secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"key_id": "KEY1", "issuer_id": "issuer", "private_key": "pk", "apple_id": ""}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let conn = client()
        .apple_developer_connection(&format!("{}/build/abc", server.uri()), "secret-token")
        .await
        .unwrap();

    let key = conn.api_key.expect("api key connection");
    assert_eq!(key.key_id, "KEY1");
    assert!(conn.apple_id.is_none());
}

#[tokio::test]
async fn test_server_errors_are_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PORTAL_DATA))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(2)
        .mount(&server)
        .await;

    let err = client()
        .apple_developer_connection(&format!("{}/build/abc", server.uri()), "secret-token")
        .await
        .unwrap_err();

    assert!(matches!(err, DevPortalError::Network { status: 503, .. }));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PORTAL_DATA))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = client()
        .apple_developer_connection(&format!("{}/build/abc", server.uri()), "secret-token")
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_unauthorized_api_key_only_is_missing_config() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PORTAL_DATA))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    let env = env_for(&server);
    let provider = client();
    // Manual inputs exist but are not eligible under this policy.
    let inputs = ManualInputs {
        username: "dev@example.com".to_string(),
        password: "secret".to_string(),
        ..Default::default()
    };

    let err = AuthSelector::new(&env, &provider)
        .select(AuthSource::for_policy(ConnectionPolicy::ApiKeyOnly), &inputs)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthError::MissingAuthConfig {
            connection_empty: false
        }
    ));
}

#[tokio::test]
async fn test_not_found_falls_back_to_manual_inputs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PORTAL_DATA))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let env = env_for(&server);
    let provider = client();
    let inputs = ManualInputs {
        username: "dev@example.com".to_string(),
        password: "secret".to_string(),
        team_id: "TEAM1".to_string(),
        ..Default::default()
    };

    let selection = AuthSelector::new(&env, &provider)
        .select(AuthSource::for_policy(ConnectionPolicy::Automatic), &inputs)
        .await
        .unwrap();

    assert_eq!(selection.source, AuthSource::InputLegacy);
    let Credentials::Legacy(creds) = selection.credentials else {
        panic!("expected Apple ID credentials");
    };
    assert_eq!(creds.username, "dev@example.com");
    assert_eq!(creds.session, "");
    assert_eq!(creds.team_id, "TEAM1");
}

#[tokio::test]
async fn test_connected_api_key_wins_over_inputs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PORTAL_DATA))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"key_id": "CONN", "issuer_id": "conn-issuer", "private_key": "conn-pk"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    let env = env_for(&server);
    let provider = client();
    let inputs = ManualInputs {
        username: "dev@example.com".to_string(),
        password: "secret".to_string(),
        ..Default::default()
    };

    let selection = AuthSelector::new(&env, &provider)
        .select(AuthSource::for_policy(ConnectionPolicy::Automatic), &inputs)
        .await
        .unwrap();

    assert_eq!(selection.source, AuthSource::ConnectionApiKey);
    let Credentials::ApiKey(key) = selection.credentials else {
        panic!("expected API key credentials");
    };
    assert_eq!(key.issuer_id, "conn-issuer");
    assert_eq!(key.private_key, "conn-pk");
}
