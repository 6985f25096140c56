//! Integration tests for the HTTP alerting client against a mock vendor API.

use std::time::Duration;

use fleetpatch::monitor::{AlertingApi, HttpAlertingApi};
use fleetpatch::Error;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api(server: &MockServer) -> HttpAlertingApi {
    HttpAlertingApi::new(&server.uri(), "test-key", Duration::from_secs(2))
        .expect("client builds")
}

#[tokio::test]
async fn test_pause_posts_mute_window() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/maintenance"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_json(serde_json::json!({ "pause_minutes": 90 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    api(&server)
        .pause_all(Duration::from_secs(90 * 60))
        .await
        .expect("pause succeeds");
}

#[tokio::test]
async fn test_resume_deletes_mute_window() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/maintenance"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    api(&server).resume_all().await.expect("resume succeeds");
}

#[tokio::test]
async fn test_vendor_error_maps_to_external_system_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/maintenance"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/maintenance"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = api(&server);
    let pause_err = client.pause_all(Duration::from_secs(60)).await.unwrap_err();
    assert!(matches!(pause_err, Error::ExternalSystemUnavailable(_)));

    let resume_err = client.resume_all().await.unwrap_err();
    assert!(matches!(resume_err, Error::ExternalSystemUnavailable(_)));
}

#[tokio::test]
async fn test_unreachable_vendor_maps_to_external_system_unavailable() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let client = HttpAlertingApi::new(&uri, "test-key", Duration::from_millis(200))
        .expect("client builds");
    let err = client.pause_all(Duration::from_secs(60)).await.unwrap_err();
    assert!(matches!(err, Error::ExternalSystemUnavailable(_)));
}

#[tokio::test]
async fn test_trailing_slash_in_base_url_is_normalized() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/maintenance"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpAlertingApi::new(
        &format!("{}/", server.uri()),
        "test-key",
        Duration::from_secs(2),
    )
    .expect("client builds");
    client
        .pause_all(Duration::from_secs(60))
        .await
        .expect("pause succeeds");
}
