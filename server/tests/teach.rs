//! Integration tests for the /teach endpoint

mod common;

use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use tower::ServiceExt;

use common::*;
use server::config::ServerConfig;

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app(ScriptedGenerator::streaming(vec![]));
    let response = app
        .router
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_missing_user_message_touches_no_collaborator() {
    let app = create_test_app(ScriptedGenerator::streaming(vec!["Unused. "]));
    let mut body = teach_body();
    body.as_object_mut().unwrap().remove("userMessage");

    let (status, json) = post_json(app.router, "/teach", body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("userMessage"));
    assert_eq!(app.generator.calls(), 0);
    assert_eq!(app.synthesizer.calls(), 0);
    assert_eq!(app.context.calls(), 0);
}

#[tokio::test]
async fn test_wrong_field_type_is_rejected() {
    let app = create_test_app(ScriptedGenerator::streaming(vec![]));
    let mut body = teach_body();
    body["lessonId"] = serde_json::json!(7);

    let (status, json) = post_json(app.router, "/api/teach", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("lessonId"));
    assert_eq!(app.generator.calls(), 0);
}

#[tokio::test]
async fn test_streaming_response_preserves_sentence_order() {
    let app = create_test_app(ScriptedGenerator::streaming(vec![
        "I don't ",
        "understand fractions. ",
        "Can you help?",
    ]));

    let (status, json) = post_json(app.router, "/teach", teach_body()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["lessonComplete"], false);
    let teacher = &json["teacherResponse"];
    assert_eq!(
        teacher["displayText"],
        "I don't understand fractions. Can you help?"
    );
    assert_eq!(
        teacher["combinedAudioEncoded"],
        tts_core::encode_base64(b"I don't understand fractions.Can you help?")
    );
    assert!(teacher["diagram"].is_null());
    assert_eq!(app.synthesizer.calls(), 2);

    for _ in 0..50 {
        if !app.sink.saved.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let saved = app.sink.saved.lock().unwrap().clone();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, "s1");
}

#[tokio::test]
async fn test_lesson_completion_and_diagram_are_reported() {
    let app = create_test_app(ScriptedGenerator::streaming(vec![
        "You got it. ",
        "```mermaid\ngraph TD; Whole-->Half\n```\n",
        "Well done! [LESSON_COMPLETE]",
    ]));

    let (status, json) = post_json(app.router, "/teach", teach_body()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["lessonComplete"], true);
    assert_eq!(json["teacherResponse"]["diagram"], "graph TD; Whole-->Half");
    let display = json["teacherResponse"]["displayText"].as_str().unwrap();
    assert!(!display.contains("LESSON_COMPLETE"));
    assert!(!display.contains("mermaid"));
}

#[tokio::test]
async fn test_stream_failure_is_answered_by_fallback() {
    let app = create_test_app(
        ScriptedGenerator::breaking(vec!["Let me explain"], "connection reset")
            .with_complete(Ok("A fraction names part of a whole.")),
    );

    let (status, json) = post_json(app.router, "/teach", teach_body()).await;

    assert_eq!(status, StatusCode::OK);
    let teacher = &json["teacherResponse"];
    assert_eq!(teacher["displayText"], "A fraction names part of a whole.");
    assert_eq!(
        teacher["combinedAudioEncoded"],
        tts_core::encode_base64(b"A fraction names part of a whole.")
    );
    // One streaming call plus one single-shot call.
    assert_eq!(app.generator.calls(), 2);
    assert_eq!(app.context.calls(), 1);
}

#[tokio::test]
async fn test_both_paths_failing_reports_details() {
    let app = create_test_app(
        ScriptedGenerator::breaking(vec![], "connection reset")
            .with_complete(Err("service unavailable")),
    );

    let (status, json) = post_json(app.router, "/teach", teach_body()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert_eq!(json["details"]["stage"], "fallback");
    assert!(json["details"]["streamError"]
        .as_str()
        .unwrap()
        .contains("connection reset"));
    assert!(json["details"]["fallbackError"]
        .as_str()
        .unwrap()
        .contains("service unavailable"));
}

#[tokio::test]
async fn test_metrics_reflect_pipeline_outcomes() {
    let app = create_test_app(
        ScriptedGenerator::breaking(vec![], "connection reset")
            .with_complete(Ok("Recovered answer here.")),
    );

    let (status, _) = post_json(app.router.clone(), "/teach", teach_body()).await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["pipeline"]["fallbacks"], 1);
    assert_eq!(json["pipeline"]["streaming_completions"], 0);
    assert_eq!(json["endpoints"]["teach"]["request_count"], 1);
    assert_eq!(json["system"]["request_count"], 1);
}

#[tokio::test]
async fn test_invalid_json_body_is_rejected() {
    let app = create_test_app(ScriptedGenerator::streaming(vec![]));
    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/teach")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.generator.calls(), 0);
}

#[tokio::test]
async fn test_stalled_stream_falls_back_before_request_timeout() {
    let config = ServerConfig {
        request_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let app = create_test_app_with(
        ScriptedGenerator::stalling(vec!["Thinking"])
            .with_complete(Ok("Here is the whole answer.")),
        config,
    );

    let (status, json) = post_json(app.router, "/teach", teach_body()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["teacherResponse"]["displayText"],
        "Here is the whole answer."
    );
    assert_eq!(app.generator.calls(), 2);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = create_test_app(ScriptedGenerator::streaming(vec![]));
    let body = "x".repeat(server::MAX_BODY_BYTES + 1);
    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/teach")
                .header("content-type", "application/json")
                .header("content-length", body.len())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.generator.calls(), 0);
}
