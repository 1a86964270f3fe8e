//! Integration tests for authentication and the request layer, against a
//! mocked vendor API.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Method;
use serde_json::json;
use tractive_client::{Payload, TractiveClient};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

async fn mount_token(server: &MockServer, expires_in: i64, expect: u64) {
    let expires_at = (unix_now() as i64 + expires_in).max(0) as u64;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_json(json!({
            "platform_email": "user@example.com",
            "platform_token": "secret",
            "grant_type": "tractive",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_id": "u1",
            "access_token": "t1",
            "expires_at": expires_at,
        })))
        .expect(expect)
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> TractiveClient {
    TractiveClient::builder()
        .base_url(server.uri())
        .email("user@example.com")
        .password("secret")
        .retry_delay(|_| Duration::ZERO)
        .build()
        .unwrap()
}

#[tokio::test]
async fn login_attaches_bearer_and_user_headers() {
    let server = MockServer::start().await;
    mount_token(&server, 7200, 1).await;

    Mock::given(method("GET"))
        .and(path("/tracker/123"))
        .and(header("authorization", "Bearer t1"))
        .and(header("x-tractive-user", "u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "123"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let payload = client
        .request(Method::GET, "tracker/123", None, None)
        .await
        .unwrap();

    let json = payload.as_json().expect("JSON payload");
    assert_eq!(json["_id"], "123");
}

#[tokio::test]
async fn credentials_are_cached_between_requests() {
    let server = MockServer::start().await;
    // Token valid well past the refresh skew: exactly one login expected.
    mount_token(&server, 2 * 3600 + 600, 1).await;

    Mock::given(method("GET"))
        .and(path("/user/u1/trackers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.trackers().list().await.unwrap();
    client.trackers().list().await.unwrap();
}

#[tokio::test]
async fn credentials_inside_skew_are_refreshed() {
    let server = MockServer::start().await;
    // Expiry inside the default 3600 s skew: every request re-authenticates.
    mount_token(&server, 120, 2).await;

    Mock::given(method("GET"))
        .and(path("/user/u1/trackers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.trackers().list().await.unwrap();
    client.trackers().list().await.unwrap();
}

#[tokio::test]
async fn rejected_login_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.trackers().list().await.unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn rate_limit_retries_until_success() {
    let server = MockServer::start().await;
    mount_token(&server, 7200, 1).await;

    Mock::given(method("GET"))
        .and(path("/user/u1/trackers"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/u1/trackers"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"_id": "TRK1", "_type": "tracker", "_version": "1"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let trackers = client.trackers().list().await.unwrap();
    assert_eq!(trackers.len(), 1);
    assert_eq!(trackers[0].id, "TRK1");
}

#[tokio::test]
async fn rate_limit_exhaustion_counts_attempts() {
    let server = MockServer::start().await;
    mount_token(&server, 7200, 1).await;

    Mock::given(method("GET"))
        .and(path("/user/u1/trackers"))
        .respond_with(ResponseTemplate::new(429))
        // retry_count retries plus the initial attempt.
        .expect(4)
        .mount(&server)
        .await;

    let client = TractiveClient::builder()
        .base_url(server.uri())
        .email("user@example.com")
        .password("secret")
        .retry_count(3)
        .retry_delay(|_| Duration::ZERO)
        .build()
        .unwrap();

    let err = client.trackers().list().await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(
        err.to_string(),
        "rate limit exceeded after 4 attempts"
    );
}

#[tokio::test]
async fn http_statuses_map_onto_the_taxonomy() {
    let server = MockServer::start().await;
    mount_token(&server, 7200, 1).await;

    Mock::given(method("GET"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(400).set_body_string("missing field"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/forbidden"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/teapot"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server);

    let err = client
        .request(Method::GET, "bad", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, tractive_client::Error::BadRequest(ref m) if m == "missing field"));

    let err = client
        .request(Method::GET, "missing", None, None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = client
        .request(Method::GET, "forbidden", None, None)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    let err = client
        .request(Method::GET, "teapot", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, tractive_client::Error::Api { status: 500, .. }));
}

#[tokio::test]
async fn non_json_responses_return_raw_bytes() {
    let server = MockServer::start().await;
    mount_token(&server, 7200, 1).await;

    Mock::given(method("GET"))
        .and(path("/export"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"a,b\n1,2\n".to_vec(), "text/csv"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let payload = client
        .request(Method::GET, "export", None, None)
        .await
        .unwrap();

    match payload {
        Payload::Bytes(bytes) => assert_eq!(&bytes[..], b"a,b\n1,2\n"),
        Payload::Json(_) => panic!("expected raw bytes for text/csv"),
    }
}

#[tokio::test]
async fn position_history_passes_time_range() {
    let server = MockServer::start().await;
    mount_token(&server, 7200, 1).await;

    Mock::given(method("GET"))
        .and(path("/tracker/TRK1/positions"))
        .and(query_param("time_from", "100"))
        .and(query_param("time_to", "200"))
        .and(query_param("format", "json_segments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[{"lat": 1.0}]])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let positions = client.trackers().positions("TRK1", 100, 200).await.unwrap();
    assert!(positions.is_array());
}

#[tokio::test]
async fn trackable_object_details_round_trip() {
    let server = MockServer::start().await;
    mount_token(&server, 7200, 1).await;

    Mock::given(method("GET"))
        .and(path("/user/u1/trackable_objects"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"_id": "PET1", "_type": "pet", "_version": "2"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/trackable_object/PET1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"details": {"name": "Rex"}})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let pets = client.trackable_objects().list().await.unwrap();
    assert_eq!(pets[0].id, "PET1");

    let details = client.trackable_objects().details("PET1").await.unwrap();
    assert_eq!(details["details"]["name"], "Rex");
}
