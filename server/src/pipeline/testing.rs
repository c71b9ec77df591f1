//! Scripted collaborators for pipeline unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use llm_core::{
    FragmentStream, GenerationError, GenerationEvent, GenerationService, LessonContext,
    PendingContext, TeachingResult,
};
use tts_core::SpeechSynthesizer;

use crate::context::ContextBuilder;
use crate::persistence::{Interaction, InteractionSink};

/// One scripted stream item.
#[derive(Debug, Clone)]
pub enum Step {
    Fragment(&'static str),
    Final(TeachingResult),
    Fail(&'static str),
}

/// Generator whose stream and single-shot answers are fixed up front.
pub struct MockGenerator {
    script: Vec<Step>,
    hang_after_script: bool,
    complete: Result<TeachingResult, String>,
    stream_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            hang_after_script: false,
            complete: Err("single-shot not scripted".to_string()),
            stream_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
        }
    }

    /// Stream `fragments` and finish with the result parsed from their
    /// concatenation.
    pub fn streaming(fragments: &[&'static str]) -> Self {
        let full: String = fragments.concat();
        let mut script: Vec<Step> = fragments.iter().copied().map(Step::Fragment).collect();
        script.push(Step::Final(TeachingResult::from_completion(&full)));
        Self::new(script)
    }

    pub fn with_complete(mut self, result: Result<TeachingResult, String>) -> Self {
        self.complete = result;
        self
    }

    /// Never end the stream once the script is exhausted.
    pub fn hanging(mut self) -> Self {
        self.hang_after_script = true;
        self
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for MockGenerator {
    async fn stream(
        &self,
        _message: &str,
        context: PendingContext,
    ) -> Result<FragmentStream, GenerationError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        context.await.map_err(GenerationError::Context)?;

        let items: Vec<Result<GenerationEvent, GenerationError>> = self
            .script
            .iter()
            .map(|step| match step {
                Step::Fragment(text) => Ok(GenerationEvent::Fragment(text.to_string())),
                Step::Final(result) => Ok(GenerationEvent::Final(result.clone())),
                Step::Fail(msg) => Err(GenerationError::Other(msg.to_string())),
            })
            .collect();

        let scripted = stream::iter(items);
        if self.hang_after_script {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }

    async fn complete(
        &self,
        _message: &str,
        _context: &LessonContext,
    ) -> Result<TeachingResult, GenerationError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.complete.clone().map_err(GenerationError::Other)
    }
}

/// Synthesizer that returns the input text as bytes.
#[derive(Default)]
pub struct MockSynthesizer {
    fail_all: bool,
    fail_on: HashSet<String>,
    delays: HashMap<String, Duration>,
    default_delay: Option<Duration>,
    texts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn fail_on(mut self, text: &str) -> Self {
        self.fail_on.insert(text.to_string());
        self
    }

    pub fn delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.texts.lock().unwrap().len()
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        self.texts.lock().unwrap().push(text.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(text).copied().or(self.default_delay) {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_all || self.fail_on.contains(text) {
            anyhow::bail!("synthesis unavailable for {text:?}");
        }
        Ok(text.as_bytes().to_vec())
    }
}

pub struct MockContext {
    result: Result<serde_json::Value, String>,
    hang: bool,
    calls: AtomicUsize,
}

impl MockContext {
    pub fn ok() -> Self {
        Self {
            result: Ok(serde_json::json!({ "lesson": "fractions" })),
            hang: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
            ..Self::ok()
        }
    }

    /// Never finish building.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::ok()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextBuilder for MockContext {
    async fn build(
        &self,
        _user_id: &str,
        _session_id: &str,
        _lesson_id: &str,
    ) -> anyhow::Result<LessonContext> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        match &self.result {
            Ok(value) => Ok(LessonContext::new(value.clone())),
            Err(reason) => Err(anyhow::anyhow!("{reason}")),
        }
    }
}

#[derive(Default)]
pub struct MockSink {
    fail: bool,
    saved: Mutex<Vec<(String, Interaction)>>,
}

impl MockSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<(String, Interaction)> {
        self.saved.lock().unwrap().clone()
    }

    /// Wait until the detached save has run, up to one second.
    pub async fn wait_for_saves(&self, count: usize) {
        for _ in 0..100 {
            if self.saved.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl InteractionSink for MockSink {
    async fn save(&self, session_id: &str, interaction: Interaction) -> anyhow::Result<()> {
        self.saved
            .lock()
            .unwrap()
            .push((session_id.to_string(), interaction));
        if self.fail {
            anyhow::bail!("database unavailable");
        }
        Ok(())
    }
}

pub fn result(display: &str) -> TeachingResult {
    TeachingResult {
        display_text: display.to_string(),
        audio_text: display.to_string(),
        diagram: None,
        lesson_complete: false,
    }
}
