//! Mock HTTP tests for AnalysisClient and the analysis screen.
//!
//! These tests cover:
//! - Multipart request formatting for photos and audio
//! - Response decoding
//! - Error classification for non-2xx and malformed responses
//! - One connectivity alert per failed attempt

use std::sync::Arc;
use std::time::Duration;

use glitters::analysis::{
    Alert, AnalysisClient, AnalysisError, Phase, ScreenModel, AUDIO_FILE_NAME, IMAGE_FILE_NAME,
};
use glitters::audio::PLACEHOLDER_AUDIO;
use glitters::camera::PLACEHOLDER_STILL;
use glitters::dispatch::Inline;
use wiremock::matchers::{header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const UPLOAD_PATH: &str = "/appupload.php";

fn client_for(server: &MockServer) -> AnalysisClient {
    AnalysisClient::with_endpoint(format!("{}{}", server.uri(), UPLOAD_PATH)).unwrap()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn analysis_body() -> serde_json::Value {
    serde_json::json!({
        "title": "Healthy heartbeat",
        "text": "Rhythm and rate look normal."
    })
}

// === Request formatting ===

#[tokio::test]
async fn test_upload_image_sends_multipart_jpeg() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .and(header_regex("content-type", "^multipart/form-data; boundary="))
        .respond_with(ResponseTemplate::new(200).set_body_json(analysis_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let response = client
        .upload_image(PLACEHOLDER_STILL.to_vec())
        .await
        .unwrap();

    assert_eq!(response.title, "Healthy heartbeat");
    assert_eq!(response.text, "Rhythm and rate look normal.");

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body = &requests[0].body;
    assert!(contains(body, b"name=\"image\""));
    assert!(contains(
        body,
        format!("filename=\"{}\"", IMAGE_FILE_NAME).as_bytes()
    ));
    assert!(contains(body, b"Content-Type: image/jpeg"));
    assert!(contains(body, PLACEHOLDER_STILL));
}

#[tokio::test]
async fn test_upload_audio_sends_multipart_m4a() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(analysis_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let response = client
        .upload_audio(PLACEHOLDER_AUDIO.to_vec())
        .await
        .unwrap();
    assert_eq!(response.title, "Healthy heartbeat");

    let requests = mock_server.received_requests().await.unwrap();
    let body = &requests[0].body;
    assert!(contains(body, b"name=\"audio\""));
    assert!(contains(
        body,
        format!("filename=\"{}\"", AUDIO_FILE_NAME).as_bytes()
    ));
    assert!(contains(body, b"Content-Type: audio/mp4"));
}

#[tokio::test]
async fn test_invalid_image_is_not_uploaded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(analysis_body()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let result = client.upload_image(b"plain text".to_vec()).await;
    assert!(matches!(result, Err(AnalysisError::InvalidPayload(_))));

    let screen = ScreenModel::new(Arc::new(Inline));
    assert!(screen
        .analyze_photo(&client, b"plain text".to_vec())
        .await
        .is_err());
    let state = screen.lock();
    assert_eq!(state.current_alert().map(Alert::title), Some("Upload Failed"));
}

// === Error handling ===

#[tokio::test]
async fn test_server_error_is_upload_failed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let result = client.upload_image(PLACEHOLDER_STILL.to_vec()).await;

    match result {
        Err(AnalysisError::UploadFailed { status, message }) => {
            assert_eq!(status, Some(500));
            assert!(message.contains("Internal Server Error"));
        }
        other => panic!("Expected UploadFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_json_is_decode_failed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"title": "missing text"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let result = client.upload_image(PLACEHOLDER_STILL.to_vec()).await;

    let err = result.unwrap_err();
    assert!(matches!(err, AnalysisError::DecodeFailed(_)));
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_upload_failed() {
    let client = AnalysisClient::with_options(
        "http://127.0.0.1:9/appupload.php".to_string(),
        Duration::from_secs(2),
    )
    .unwrap();

    let result = client.upload_image(PLACEHOLDER_STILL.to_vec()).await;

    assert!(matches!(
        result,
        Err(AnalysisError::UploadFailed { status: None, .. })
    ));
}

// === Screen state ===

#[tokio::test]
async fn test_each_failed_attempt_raises_one_connection_alert() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let screen = ScreenModel::new(Arc::new(Inline));

    assert!(screen
        .analyze_photo(&client, PLACEHOLDER_STILL.to_vec())
        .await
        .is_err());
    {
        let state = screen.lock();
        assert_eq!(state.phase(), &Phase::Failed);
        assert_eq!(state.alerts().collect::<Vec<_>>(), vec![&Alert::Connection]);
        assert!(!state.progress_visible());
    }

    assert!(screen
        .analyze_photo(&client, PLACEHOLDER_STILL.to_vec())
        .await
        .is_err());
    let mut state = screen.lock();
    assert_eq!(state.attempts(), 2);
    assert_eq!(state.alerts().count(), 2);
    assert_eq!(state.dismiss_alert(), Some(Alert::Connection));
    assert_eq!(state.dismiss_alert(), Some(Alert::Connection));
    assert_eq!(state.dismiss_alert(), None);
}

#[tokio::test]
async fn test_successful_attempt_shows_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(analysis_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let screen = ScreenModel::new(Arc::new(Inline));
    screen.apply(|s| s.set_photo(PLACEHOLDER_STILL.to_vec()));

    let response = screen.analyze_current_photo(&client).await.unwrap();

    let state = screen.lock();
    assert_eq!(state.phase(), &Phase::Showing(response));
    assert_eq!(state.alerts().count(), 0);
    assert!(state.photo().is_some());
}

#[tokio::test]
async fn test_analyze_without_photo_raises_upload_alert() {
    let mock_server = MockServer::start().await;
    let client = client_for(&mock_server);
    let screen = ScreenModel::new(Arc::new(Inline));

    let result = screen.analyze_current_photo(&client).await;

    assert!(matches!(result, Err(AnalysisError::InvalidPayload(_))));
    let state = screen.lock();
    assert!(matches!(
        state.current_alert(),
        Some(Alert::UploadFailed { .. })
    ));
}
