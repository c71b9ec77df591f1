//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use futures_util::stream::{self, StreamExt};
use llm_core::{
    FragmentStream, GenerationError, GenerationEvent, GenerationService, LessonContext,
    PendingContext, TeachingResult,
};
use serde_json::Value;
use tower::ServiceExt;

use server::config::ServerConfig;
use server::context::ContextBuilder;
use server::persistence::{Interaction, InteractionSink};
use server::pipeline::TeachingPipeline;
use server::{build_router, AppState};
use tts_core::SpeechSynthesizer;

/// Generator that replays fixed fragments, optionally failing at the end.
pub struct ScriptedGenerator {
    fragments: Vec<&'static str>,
    stream_error: Option<&'static str>,
    stall: bool,
    complete: Result<&'static str, &'static str>,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn streaming(fragments: Vec<&'static str>) -> Self {
        Self {
            fragments,
            stream_error: None,
            stall: false,
            complete: Err("single-shot not expected"),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn breaking(fragments: Vec<&'static str>, error: &'static str) -> Self {
        Self {
            stream_error: Some(error),
            ..Self::streaming(fragments)
        }
    }

    /// Send `fragments`, then never end the stream.
    pub fn stalling(fragments: Vec<&'static str>) -> Self {
        Self {
            stall: true,
            ..Self::streaming(fragments)
        }
    }

    pub fn with_complete(mut self, complete: Result<&'static str, &'static str>) -> Self {
        self.complete = complete;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn stream(
        &self,
        _message: &str,
        context: PendingContext,
    ) -> Result<FragmentStream, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        context.await.map_err(GenerationError::Context)?;

        let mut items: Vec<Result<GenerationEvent, GenerationError>> = self
            .fragments
            .iter()
            .map(|f| Ok(GenerationEvent::Fragment(f.to_string())))
            .collect();
        if self.stall {
            return Ok(stream::iter(items).chain(stream::pending()).boxed());
        }
        match self.stream_error {
            Some(error) => items.push(Err(GenerationError::Other(error.to_string()))),
            None => items.push(Ok(GenerationEvent::Final(TeachingResult::from_completion(
                &self.fragments.concat(),
            )))),
        }
        Ok(stream::iter(items).boxed())
    }

    async fn complete(
        &self,
        _message: &str,
        _context: &LessonContext,
    ) -> Result<TeachingResult, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.complete
            .map(TeachingResult::from_completion)
            .map_err(|e| GenerationError::Other(e.to_string()))
    }
}

/// Synthesizer that echoes its input as bytes and records every call.
#[derive(Default)]
pub struct EchoSynthesizer {
    pub texts: Mutex<Vec<String>>,
}

impl EchoSynthesizer {
    pub fn calls(&self) -> usize {
        self.texts.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(text.as_bytes().to_vec())
    }
}

#[derive(Default)]
pub struct CountingContext {
    pub calls: AtomicUsize,
}

impl CountingContext {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextBuilder for CountingContext {
    async fn build(
        &self,
        _user_id: &str,
        _session_id: &str,
        lesson_id: &str,
    ) -> anyhow::Result<LessonContext> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LessonContext::new(serde_json::json!({ "lessonId": lesson_id })))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub saved: Mutex<Vec<(String, Interaction)>>,
}

#[async_trait]
impl InteractionSink for RecordingSink {
    async fn save(&self, session_id: &str, interaction: Interaction) -> anyhow::Result<()> {
        self.saved
            .lock()
            .unwrap()
            .push((session_id.to_string(), interaction));
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub generator: Arc<ScriptedGenerator>,
    pub synthesizer: Arc<EchoSynthesizer>,
    pub context: Arc<CountingContext>,
    pub sink: Arc<RecordingSink>,
}

/// Create a test app instance around the given generator
pub fn create_test_app(generator: ScriptedGenerator) -> TestApp {
    create_test_app_with(generator, ServerConfig::default())
}

pub fn create_test_app_with(generator: ScriptedGenerator, config: ServerConfig) -> TestApp {
    let generator = Arc::new(generator);
    let synthesizer = Arc::new(EchoSynthesizer::default());
    let context = Arc::new(CountingContext::default());
    let sink = Arc::new(RecordingSink::default());

    let pipeline = TeachingPipeline::new(
        generator.clone(),
        synthesizer.clone(),
        context.clone(),
        sink.clone(),
        config.pipeline_config(),
    );
    let router = build_router(AppState::new(pipeline, config)).unwrap();

    TestApp {
        router,
        generator,
        synthesizer,
        context,
        sink,
    }
}

pub async fn post_json(router: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

pub fn teach_body() -> Value {
    serde_json::json!({
        "userId": "u1",
        "sessionId": "s1",
        "lessonId": "fractions-101",
        "userMessage": "I don't understand fractions."
    })
}
