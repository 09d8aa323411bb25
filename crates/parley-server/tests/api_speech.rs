mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use common::{build_state, fast_settings, EchoRecognizer, ScriptedGenerator};
use parley_types::{ConversationMessage, Role};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(generator: Arc<ScriptedGenerator>) -> Router {
    parley_server::app(build_state(
        Arc::new(EchoRecognizer),
        generator,
        fast_settings(),
    ))
}

fn speech_request(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/generate-speech")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn speech_is_streamed_as_inline_l16() {
    let generator = Arc::new(ScriptedGenerator::new(&["a", "b", "c"]));
    let app = app_with(generator.clone());

    let response = app
        .oneshot(speech_request(json!({ "content": "say something" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/l16");
    assert_eq!(response.headers()[header::CONTENT_DISPOSITION], "inline");
    assert_eq!(body_bytes(response).await, b"audio(a)audio(b)audio(c)");

    let calls = generator.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.is_empty());
    assert_eq!(calls[0].1, "say something");
}

#[tokio::test]
async fn conversation_history_reaches_the_generator() {
    let generator = Arc::new(ScriptedGenerator::new(&["ok"]));
    let app = app_with(generator.clone());

    let response = app
        .oneshot(speech_request(json!({
            "content": "and tomorrow?",
            "conversation_history": [
                {"role": "user", "parts": [{"text": "weather today?"}]},
                {"role": "model", "parts": [{"text": "sunny"}]}
            ]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"audio(ok)");

    let calls = generator.calls.lock().unwrap();
    let (history, content) = &calls[0];
    assert_eq!(
        history,
        &vec![
            ConversationMessage::user("weather today?"),
            ConversationMessage::model("sunny"),
        ]
    );
    assert_eq!(history[1].role, Role::Model);
    assert_eq!(content, "and tomorrow?");
}

#[tokio::test]
async fn generation_failure_truncates_the_body() {
    let generator = Arc::new(ScriptedGenerator::failing_after(&["a"], "quota exhausted"));
    let app = app_with(generator);

    let response = app
        .oneshot(speech_request(json!({ "content": "hello" })))
        .await
        .unwrap();

    // Headers are already committed, so the failure only shows as a short body.
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"audio(a)");
}

#[tokio::test]
async fn empty_generation_yields_empty_body() {
    let app = app_with(Arc::new(ScriptedGenerator::new(&["", ""])));

    let response = app
        .oneshot(speech_request(json!({ "content": "hello" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_streaming() {
    let history: Vec<Value> = (0..5)
        .map(|i| json!({"role": "user", "parts": [{"text": format!("turn {}", i)}]}))
        .collect();
    let cases = [
        (json!({ "content": "   " }), "content must not be empty"),
        (json!({ "content": "x".repeat(65) }), "content exceeds 64 bytes"),
        (
            json!({ "content": "hi", "conversation_history": history }),
            "conversation_history exceeds 4 messages",
        ),
    ];

    for (body, expected) in cases {
        let generator = Arc::new(ScriptedGenerator::new(&["never"]));
        let response = app_with(generator.clone())
            .oneshot(speech_request(body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let v: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(v["error"], expected);
        assert!(generator.calls.lock().unwrap().is_empty());
    }
}

#[tokio::test]
async fn health_check_returns_ok() {
    let app = app_with(Arc::new(ScriptedGenerator::default()));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}
