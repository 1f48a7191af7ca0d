//! `ReqwestNetworkClient` against a local mock backend.

use std::time::Duration;

use exposure_core::analytics::{AnalyticsRecord, OperationalInfo};
use exposure_core::network::{NetworkClient, NetworkRequest, ReqwestNetworkClient};
use exposure_core::otp::Otp;
use exposure_core::state::{ExposureNotificationStatus, PushNotificationStatus};
use exposure_core::{CalendarDay, NetworkError};
use url::Url;

fn client() -> ReqwestNetworkClient {
    ReqwestNetworkClient::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn dummy_upload_reaches_the_ingestion_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/ingestion/upload")
        .match_header("immuni-dummy-data", "1")
        .match_header("immuni-client-clock", "0")
        .match_header("user-agent", "Immuni")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let base = Url::parse(&server.url()).unwrap();
    let request = NetworkRequest::dummy_ingestion(&base, 4_096).unwrap();
    let response = client().send(request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"{}");
    mock.assert_async().await;
}

#[tokio::test]
async fn backend_error_codes_are_typed() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/ingestion/check-otp")
        .with_status(401)
        .with_body(r#"{"error_code": 1101, "message": "Unauthorized OTP"}"#)
        .create_async()
        .await;

    let base = Url::parse(&server.url()).unwrap();
    let otp = Otp::generate(&mut rand::thread_rng());
    let request = NetworkRequest::otp_validation(&base, &otp, chrono::Utc::now(), 4_096).unwrap();

    assert_eq!(
        client().send(request).await,
        Err(NetworkError::UnauthorizedOtp)
    );
}

#[tokio::test]
async fn unparseable_errors_fall_back_on_status() {
    let mut server = mockito::Server::new_async().await;
    let _bad = server
        .mock("POST", "/v1/ingestion/check-otp")
        .with_status(400)
        .with_body("nope")
        .create_async()
        .await;

    let base = Url::parse(&server.url()).unwrap();
    let otp = Otp::generate(&mut rand::thread_rng());
    let request = NetworkRequest::otp_validation(&base, &otp, chrono::Utc::now(), 4_096).unwrap();
    assert_eq!(client().send(request).await, Err(NetworkError::BadRequest));
}

#[tokio::test]
async fn analytics_record_carries_the_analytics_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/analytics/apple/operational-info")
        .match_header("authorization", "Bearer token-abc")
        .match_header("immuni-dummy-data", "0")
        .with_status(204)
        .create_async()
        .await;

    let today = CalendarDay::from_ymd(2021, 10, 2).unwrap();
    let record = AnalyticsRecord {
        body: OperationalInfo::new(
            &"PA".parse().unwrap(),
            ExposureNotificationStatus::AuthorizedAndActive,
            PushNotificationStatus::Authorized,
            None,
            today,
        ),
        is_dummy: false,
    };
    let base = Url::parse(&server.url()).unwrap();
    let request = NetworkRequest::analytics(&base, &record, "token-abc").unwrap();
    client().send(request).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn token_validation_reports_the_status() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/analytics/apple/token")
        .match_header("content-type", "application/json; charset=UTF-8")
        .match_body(mockito::Matcher::Json(serde_json::json!({
            "analytics_token": "token-abc",
            "device_token": "device-xyz"
        })))
        .with_status(202)
        .create_async()
        .await;

    let base = Url::parse(&server.url()).unwrap();
    let request = NetworkRequest::analytics_token_validation(&base, "token-abc", "device-xyz").unwrap();
    let response = client().send(request).await.unwrap();

    assert_eq!(response.status, 202);
    mock.assert_async().await;
}

#[tokio::test]
async fn unreachable_backend_is_a_connection_error() {
    let base = Url::parse("http://127.0.0.1:9").unwrap();
    let request = NetworkRequest::dummy_ingestion(&base, 4_096).unwrap();
    let result = ReqwestNetworkClient::new(Duration::from_millis(500))
        .unwrap()
        .send(request)
        .await;
    assert!(matches!(result, Err(NetworkError::Connection(_))));
}
