//! Tests for the auth module

use super::*;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn password_grant_mock(token: &str, expires_in: u64) -> Mock {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": token,
            "expires_in": expires_in
        })))
}

#[tokio::test]
async fn test_fetch_sends_password_grant_form() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=alice"))
        .and(body_string_contains("password=s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-1",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(ServiceConfig::new(mock_server.uri(), "alice", "s3cret"));

    assert!(auth.ensure_authenticated(None).await.unwrap());
    assert!(auth.is_authenticated());
    assert_eq!(auth.bearer_token().as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn test_default_headers_applied_to_token_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("X-Tenant", "acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-1",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = ServiceConfig::new(mock_server.uri(), "u", "p").header("X-Tenant", "acme");
    let auth = Authenticator::new(config);

    assert!(auth.ensure_authenticated(None).await.unwrap());
}

#[tokio::test]
async fn test_token_cached_until_expiry() {
    let mock_server = MockServer::start().await;

    password_grant_mock("cached-token", 3600)
        .expect(1)
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(ServiceConfig::new(mock_server.uri(), "u", "p"));

    // Only the first call may hit the endpoint.
    assert!(auth.ensure_authenticated(None).await.unwrap());
    assert!(auth.ensure_authenticated(None).await.unwrap());
    assert!(auth.ensure_authenticated(None).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_trigger_single_fetch() {
    let mock_server = MockServer::start().await;

    // The delay keeps the first fetch in flight while the other callers
    // pile up on the refresh gate.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(100))
                .set_body_json(serde_json::json!({
                    "access_token": "single-flight",
                    "expires_in": 3600
                })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let auth = Arc::new(Authenticator::new(ServiceConfig::new(
        mock_server.uri(),
        "u",
        "p",
    )));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move { auth.ensure_authenticated(None).await })
        })
        .collect();

    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert!(outcome, "every caller must observe the single fetch outcome");
    }
}

#[tokio::test]
async fn test_rejected_credentials_notify_listeners() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "bad credentials"
        })))
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(ServiceConfig::new(mock_server.uri(), "u", "wrong"));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    auth.subscribe(move |description| {
        seen_clone.lock().unwrap().push(description.to_string());
    });

    let outcome = auth.ensure_authenticated(None).await.unwrap();
    assert!(!outcome);
    assert!(!auth.is_authenticated());
    assert!(auth.bearer_token().is_none());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("bad credentials"));
    assert!(seen[0].starts_with("Unable to retrieve API bearer token"));
}

#[tokio::test]
async fn test_rejection_without_error_description_is_protocol_violation() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({ "error": "oops" })),
        )
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(ServiceConfig::new(mock_server.uri(), "u", "p"));

    let err = auth.ensure_authenticated(None).await.unwrap_err();
    assert!(matches!(err, crate::Error::Protocol { .. }));
}

#[tokio::test]
async fn test_success_without_access_token_is_protocol_violation() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "expires_in": 3600 })),
        )
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(ServiceConfig::new(mock_server.uri(), "u", "p"));

    let err = auth.ensure_authenticated(None).await.unwrap_err();
    assert!(matches!(err, crate::Error::Protocol { .. }));
    assert!(!auth.is_authenticated());
}

#[tokio::test]
async fn test_non_json_body_is_protocol_violation() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(ServiceConfig::new(mock_server.uri(), "u", "p"));

    let err = auth.ensure_authenticated(None).await.unwrap_err();
    assert!(matches!(err, crate::Error::Protocol { .. }));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_recoverable_failure() {
    // Nothing listens on this port; the send itself fails.
    let auth = Authenticator::new(ServiceConfig::new("http://127.0.0.1:1", "u", "p"));

    let notified = Arc::new(AtomicUsize::new(0));
    let notified_clone = Arc::clone(&notified);
    auth.subscribe(move |_| {
        notified_clone.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = auth.ensure_authenticated(None).await.unwrap();
    assert!(!outcome);
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancellation_before_fetch() {
    let mock_server = MockServer::start().await;

    password_grant_mock("tok", 3600)
        .expect(1)
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(ServiceConfig::new(mock_server.uri(), "u", "p"));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = auth.ensure_authenticated(Some(&cancel)).await.unwrap_err();
    assert!(err.is_cancelled());

    // Cancellation must not leave the gate held; a later caller proceeds.
    assert!(auth.ensure_authenticated(None).await.unwrap());
}

#[tokio::test]
async fn test_cancellation_during_fetch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(30))
                .set_body_json(serde_json::json!({
                    "access_token": "slow",
                    "expires_in": 3600
                })),
        )
        .mount(&mock_server)
        .await;

    let auth = Arc::new(Authenticator::new(ServiceConfig::new(
        mock_server.uri(),
        "u",
        "p",
    )));

    let cancel = CancellationToken::new();
    let task = {
        let auth = Arc::clone(&auth);
        let cancel = cancel.clone();
        tokio::spawn(async move { auth.ensure_authenticated(Some(&cancel)).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert!(!auth.is_authenticated());
}

#[tokio::test]
async fn test_credential_change_invalidates_token() {
    let mock_server = MockServer::start().await;

    password_grant_mock("tok", 3600)
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = ServiceConfig::new(mock_server.uri(), "u", "p");
    let auth = Authenticator::new(config.clone());

    assert!(auth.ensure_authenticated(None).await.unwrap());
    assert!(auth.token_is_valid());

    // Same snapshot: no invalidation, no second fetch.
    auth.set_configuration(config.clone());
    assert!(auth.token_is_valid());
    assert!(auth.ensure_authenticated(None).await.unwrap());

    // Header-only change: still no invalidation.
    auth.set_configuration(config.clone().header("X-Extra", "1"));
    assert!(auth.token_is_valid());

    // Password change: token dropped, next ensure refetches.
    let mut changed = config;
    changed.password = "rotated".to_string();
    auth.set_configuration(changed);
    assert!(!auth.token_is_valid());
    assert!(!auth.is_authenticated());
    assert!(auth.ensure_authenticated(None).await.unwrap());
}

#[tokio::test]
async fn test_authenticated_flag_outlives_token_expiry() {
    let mock_server = MockServer::start().await;

    // expires_in = 0 yields a token that is expired the moment it lands.
    password_grant_mock("ephemeral", 0)
        .expect(1)
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(ServiceConfig::new(mock_server.uri(), "u", "p"));
    assert!(auth.ensure_authenticated(None).await.unwrap());

    // The flag changes only at fetch and invalidation boundaries, so it
    // stays raised after natural expiry while validity reports false.
    assert!(auth.is_authenticated());
    assert!(!auth.token_is_valid());
    assert!(auth.bearer_token().is_none());

    auth.invalidate_token();
    assert!(!auth.is_authenticated());
}

#[tokio::test]
async fn test_invalidate_token() {
    let mock_server = MockServer::start().await;

    password_grant_mock("tok", 3600).mount(&mock_server).await;

    let auth = Authenticator::new(ServiceConfig::new(mock_server.uri(), "u", "p"));
    assert!(auth.ensure_authenticated(None).await.unwrap());

    auth.invalidate_token();
    assert!(!auth.token_is_valid());
    assert!(!auth.is_authenticated());
    assert!(auth.bearer_token().is_none());
}

#[tokio::test]
async fn test_add_default_headers_merges() {
    let auth = Authenticator::new(
        ServiceConfig::new("http://localhost", "u", "p").header("X-Base", "1"),
    );

    let mut extra = std::collections::HashMap::new();
    extra.insert("X-Extra".to_string(), "2".to_string());
    auth.add_default_headers(extra);

    let headers = auth.default_headers();
    assert_eq!(headers.get("X-Base").map(String::as_str), Some("1"));
    assert_eq!(headers.get("X-Extra").map(String::as_str), Some("2"));
}

#[test]
fn test_ensure_authenticated_blocking() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mock_server = runtime.block_on(async {
        let server = MockServer::start().await;
        password_grant_mock("blocking-tok", 3600)
            .expect(1)
            .mount(&server)
            .await;
        server
    });

    let auth = Authenticator::new(ServiceConfig::new(mock_server.uri(), "u", "p"));

    // Called outside any runtime; spins its own.
    assert!(auth.ensure_authenticated_blocking().unwrap());
    assert_eq!(auth.bearer_token().as_deref(), Some("blocking-tok"));
}
