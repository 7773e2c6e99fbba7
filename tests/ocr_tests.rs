//! # OCR Tests Module
//!
//! Recognition against a local stand-in for the Vision `images:annotate`
//! endpoint: response parsing, retries, permanent errors and the circuit
//! breaker.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use halal_assistant::ocr::{GoogleVisionClient, OcrBackend, TextRecognizer};
use halal_assistant::ocr_config::{OcrConfig, RecoveryConfig};
use halal_assistant::ocr_errors::OcrError;

const PNG_HEADER: [u8; 16] = [
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
];

/// Scripted reply for the n-th request; the last entry repeats
#[derive(Clone)]
struct Script {
    calls: Arc<AtomicUsize>,
    replies: Arc<Vec<(StatusCode, Value)>>,
}

async fn annotate(State(script): State<Script>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    assert_eq!(body["requests"][0]["features"][0]["type"], "TEXT_DETECTION");
    assert!(body["requests"][0]["image"]["content"].as_str().is_some_and(|c| !c.is_empty()));

    let n = script.calls.fetch_add(1, Ordering::SeqCst);
    let (status, reply) = script.replies[n.min(script.replies.len() - 1)].clone();
    (status, Json(reply))
}

async fn spawn_vision(replies: Vec<(StatusCode, Value)>) -> (String, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let script = Script {
        calls: calls.clone(),
        replies: Arc::new(replies),
    };
    let app = Router::new()
        .route("/v1/annotate", post(annotate))
        .with_state(script);

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1/annotate"), calls)
}

fn fast_config(threshold: u32) -> OcrConfig {
    OcrConfig {
        recovery: RecoveryConfig {
            max_retries: 2,
            base_retry_delay_ms: 0,
            max_retry_delay_ms: 0,
            operation_timeout_secs: 5,
            circuit_breaker_threshold: threshold,
            circuit_breaker_reset_secs: 60,
        },
        ..OcrConfig::default()
    }
}

fn recognizer(endpoint: String, config: OcrConfig) -> TextRecognizer {
    let client = GoogleVisionClient::new(reqwest::Client::new(), endpoint, "test-key");
    TextRecognizer::new(OcrBackend::GoogleVision(client), config)
}

fn text_reply(text: &str) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({"responses": [{"textAnnotations": [{"description": text}, {"description": "ignored"}]}]}),
    )
}

#[tokio::test]
async fn test_recognizes_full_text() {
    let (endpoint, calls) = spawn_vision(vec![text_reply("SNICKERS\nҚұрамы: сүт шоколады,\nжелатин")]).await;
    let r = recognizer(endpoint, fast_config(5));

    let text = r.recognize(&PNG_HEADER).await.unwrap();
    assert_eq!(text.as_deref(), Some("SNICKERS Құрамы: сүт шоколады, желатин"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_text_is_none() {
    let (endpoint, _) = spawn_vision(vec![(StatusCode::OK, json!({"responses": [{}]}))]).await;
    let r = recognizer(endpoint, fast_config(5));

    assert_eq!(r.recognize(&PNG_HEADER).await.unwrap(), None);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let (endpoint, calls) = spawn_vision(vec![
        (StatusCode::SERVICE_UNAVAILABLE, json!({})),
        (StatusCode::SERVICE_UNAVAILABLE, json!({})),
        text_reply("E120"),
    ])
    .await;
    let r = recognizer(endpoint, fast_config(5));

    assert_eq!(r.recognize(&PNG_HEADER).await.unwrap().as_deref(), Some("E120"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let (endpoint, calls) = spawn_vision(vec![(StatusCode::INTERNAL_SERVER_ERROR, json!({}))]).await;
    let r = recognizer(endpoint, fast_config(10));

    let err = r.recognize(&PNG_HEADER).await.unwrap_err();
    assert!(matches!(err, OcrError::Request(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_service_error_is_not_retried() {
    let (endpoint, calls) = spawn_vision(vec![(
        StatusCode::OK,
        json!({"responses": [{"error": {"code": 3, "message": "Bad image data."}}]}),
    )])
    .await;
    let r = recognizer(endpoint, fast_config(5));

    match r.recognize(&PNG_HEADER).await {
        Err(OcrError::Service(message)) => assert_eq!(message, "Bad image data."),
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_circuit_opens_after_repeated_failures() {
    let (endpoint, calls) = spawn_vision(vec![(StatusCode::BAD_REQUEST, json!({}))]).await;
    let r = recognizer(endpoint, fast_config(2));

    assert!(matches!(r.recognize(&PNG_HEADER).await, Err(OcrError::Service(_))));
    assert!(matches!(r.recognize(&PNG_HEADER).await, Err(OcrError::Service(_))));
    assert!(matches!(r.recognize(&PNG_HEADER).await, Err(OcrError::CircuitOpen)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalid_image_never_reaches_the_service() {
    let (endpoint, calls) = spawn_vision(vec![text_reply("unused")]).await;
    let r = recognizer(endpoint, fast_config(1));

    assert!(matches!(
        r.recognize(b"%PDF-1.7 not an image").await,
        Err(OcrError::UnsupportedFormat)
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // Bad input does not count against the service
    assert!(r.recognize(&PNG_HEADER).await.is_ok());
}
