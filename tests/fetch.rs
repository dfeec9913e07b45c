use std::time::Duration;

use kobo_etl::config::ApiConfig;
use kobo_etl::error::FetchError;
use kobo_etl::fetch::{build_client, fetch_export};
use reqwest::StatusCode;
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EXPORT_PATH: &str = "/api/v2/assets/aekRS/export-settings/es8qx/data.csv";

fn api_for(server: &MockServer) -> ApiConfig {
    ApiConfig {
        export_url: format!("{}{}", server.uri(), EXPORT_PATH),
        username: "enumerator".to_string(),
        password: "s3cret".to_string(),
    }
}

fn client() -> reqwest::Client {
    build_client(Duration::from_secs(5)).expect("client")
}

#[tokio::test]
async fn fetch_returns_body_for_authorized_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EXPORT_PATH))
        .and(basic_auth("enumerator", "s3cret"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/csv; charset=utf-8")
                .set_body_string("start;end\n2024-03-01;2024-03-01\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let body = fetch_export(&client(), &api_for(&server)).await.unwrap();
    assert_eq!(body, "start;end\n2024-03-01;2024-03-01\n");
}

#[tokio::test]
async fn fetch_strips_byte_order_mark() {
    let server = MockServer::start().await;
    let mut body = vec![0xEF, 0xBB, 0xBF];
    body.extend_from_slice(b"Full Name;Gender\n");
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    let text = fetch_export(&client(), &api_for(&server)).await.unwrap();
    assert_eq!(text, "Full Name;Gender\n");
}

#[tokio::test]
async fn unauthorized_response_reports_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_string("{\"detail\":\"Invalid username/password.\"}"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = fetch_export(&client(), &api_for(&server))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    match &err {
        FetchError::Status { body, .. } => assert!(body.contains("Invalid username/password.")),
        other => panic!("expected status error, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("401"));
    assert!(message.contains("Invalid username/password."));
}

#[tokio::test]
async fn server_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let err = fetch_export(&client(), &api_for(&server))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    // `expect(1)` is verified when the server drops.
}

#[tokio::test]
async fn connection_refused_is_a_transport_error() {
    let api = ApiConfig {
        export_url: "http://127.0.0.1:9/data.csv".to_string(),
        username: "enumerator".to_string(),
        password: "s3cret".to_string(),
    };
    let err = fetch_export(&client(), &api).await.unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)));
}
