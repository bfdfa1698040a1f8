//! Integration tests for the reqwest transport and the HTTP reachability probe.

use std::sync::Arc;

use refetch::cache::parse_http_date;
use refetch::host::SystemClock;
use refetch::http::{Request, ReqwestTransport, Transport};
use refetch::probe::{ConnectivityProbe, HttpProbe};
use refetch::FetchError;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> ReqwestTransport {
  ReqwestTransport::new(Arc::new(SystemClock))
}

#[tokio::test]
async fn test_get_captures_status_headers_and_body() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/feed.json"))
    .and(header("x-api-key", "secret"))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_string(r#"{"items":[]}"#)
        .insert_header("etag", "\"abc\"")
        .insert_header("cache-control", "max-age=300"),
    )
    .mount(&mock_server)
    .await;

  let request = Request::get(format!("{}/feed.json", mock_server.uri()))
    .with_headers(vec![("x-api-key".to_string(), "secret".to_string())]);
  let response = transport().send(&request).await.expect("request failed");

  assert_eq!(response.status, 200);
  assert_eq!(response.status_text, "OK");
  assert_eq!(response.text(), r#"{"items":[]}"#);
  assert_eq!(response.etag(), Some("\"abc\""));
  assert_eq!(response.max_age(), Some(300));
  assert_eq!(response.url, format!("{}/feed.json", mock_server.uri()));
}

#[tokio::test]
async fn test_every_response_carries_a_usable_date() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .respond_with(ResponseTemplate::new(200))
    .mount(&mock_server)
    .await;

  let response = transport()
    .send(&Request::get(mock_server.uri()))
    .await
    .expect("request failed");

  let date = response.header("date").expect("date header");
  assert!(parse_http_date(date).is_some(), "unparseable date {}", date);
}

#[tokio::test]
async fn test_error_status_is_a_response_not_an_error() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/missing"))
    .respond_with(ResponseTemplate::new(404).set_body_string("no such thing"))
    .mount(&mock_server)
    .await;

  let response = transport()
    .send(&Request::get(format!("{}/missing", mock_server.uri())))
    .await
    .expect("request failed");

  assert_eq!(response.status, 404);
  assert_eq!(response.status_text, "Not Found");
  assert!(!response.is_ok());
  assert_eq!(response.text(), "no such thing");
}

#[tokio::test]
async fn test_head_request_uses_head_method() {
  let mock_server = MockServer::start().await;

  Mock::given(method("HEAD"))
    .and(path("/file.png"))
    .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"v1\""))
    .expect(1)
    .mount(&mock_server)
    .await;

  let response = transport()
    .send(&Request::head(format!("{}/file.png", mock_server.uri())))
    .await
    .expect("request failed");

  assert_eq!(response.etag(), Some("\"v1\""));
  assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_unreachable_host_is_a_network_error() {
  let result = transport().send(&Request::get("http://127.0.0.1:9/unreachable")).await;

  assert!(matches!(result, Err(FetchError::Network { .. })));
}

#[tokio::test]
async fn test_probe_reports_online_for_any_response() {
  let mock_server = MockServer::start().await;

  Mock::given(method("HEAD"))
    .respond_with(ResponseTemplate::new(503))
    .mount(&mock_server)
    .await;

  let probe = HttpProbe::with_client(reqwest::Client::new(), mock_server.uri());

  assert!(!probe.is_offline().await);
}
