use std::env;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filter::SpokenTextFilter;
use crate::sse::SseLineParser;
use crate::{
    FragmentStream, GenerationError, GenerationEvent, GenerationService, LessonContext,
    PendingContext, TeachingResult,
};

const SYSTEM_PROMPT: &str = "You are a patient, encouraging tutor. Explain one idea at a time \
in short spoken sentences. When a picture helps, add a single ```mermaid block. \
When the learner has met every lesson objective, end your reply with [LESSON_COMPLETE].";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Ollama,
}

impl LlmProvider {
    /// Parse the `LLM_PROVIDER` value; anything unknown means OpenAI.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "ollama" => LlmProvider::Ollama,
            _ => LlmProvider::OpenAI,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "gpt-4o-mini",
            LlmProvider::Ollama => "llama3.1",
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "https://api.openai.com/v1",
            // Ollama serves an OpenAI-compatible API under /v1.
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }
}

/// Structure for the Chat Completions request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u16,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkResponse {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat client. Stateless apart from configuration, so one
/// instance is shared by all requests.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u16,
}

impl LlmClient {
    /// Create a new client. OpenAI requires `OPENAI_API_KEY` in the environment.
    pub fn new(provider: LlmProvider, model: &str) -> anyhow::Result<Self> {
        let api_key = match provider {
            LlmProvider::OpenAI => Some(env::var("OPENAI_API_KEY").map_err(|_| {
                anyhow::anyhow!("OPENAI_API_KEY must be set to use the OpenAI provider")
            })?),
            LlmProvider::Ollama => None,
        };
        Ok(Self {
            http: Client::new(),
            provider,
            base_url: provider.default_base_url().to_string(),
            api_key,
            model: model.to_string(),
            max_tokens: 600,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn post(&self, body: &ChatRequest<'_>) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.http.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, GenerationError> {
        let response = self.post(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

fn system_prompt(context: &LessonContext) -> String {
    format!("{SYSTEM_PROMPT}\n\nLesson context:\n{}", context.to_prompt())
}

/// Extract the content delta of one streamed chunk, if any.
fn parse_delta(data: &str) -> Result<Option<String>, GenerationError> {
    let chunk: ChunkResponse = serde_json::from_str(data)
        .map_err(|e| GenerationError::Malformed(format!("bad stream chunk: {e}")))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

#[async_trait]
impl GenerationService for LlmClient {
    async fn stream(
        &self,
        message: &str,
        context: PendingContext,
    ) -> Result<FragmentStream, GenerationError> {
        let context = context.await.map_err(GenerationError::Context)?;
        let system = system_prompt(&context);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message { role: "system", content: &system },
                Message { role: "user", content: message },
            ],
            max_tokens: self.max_tokens,
            stream: true,
        };

        let response = self.send(&body).await?;
        let mut bytes = Box::pin(response.bytes_stream());

        let events = async_stream::stream! {
            let mut parser = SseLineParser::new();
            let mut filter = SpokenTextFilter::default();
            let mut completion = String::new();
            let mut done = false;

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(GenerationError::Request(e));
                        return;
                    }
                };
                for event in parser.push(&chunk) {
                    if event.is_done() {
                        done = true;
                        break 'read;
                    }
                    match parse_delta(&event.data) {
                        Ok(Some(delta)) => {
                            completion.push_str(&delta);
                            let spoken = filter.push(&delta);
                            if !spoken.is_empty() {
                                yield Ok(GenerationEvent::Fragment(spoken));
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if !done {
                done = parser.flush().map_or(false, |event| event.is_done());
            }
            if !done {
                yield Err(GenerationError::Incomplete);
                return;
            }

            let tail = filter.finish();
            if !tail.is_empty() {
                yield Ok(GenerationEvent::Fragment(tail));
            }
            debug!(chars = completion.len(), "generation stream finished");
            yield Ok(GenerationEvent::Final(TeachingResult::from_completion(&completion)));
        };

        Ok(Box::pin(events))
    }

    async fn complete(
        &self,
        message: &str,
        context: &LessonContext,
    ) -> Result<TeachingResult, GenerationError> {
        let system = system_prompt(context);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message { role: "system", content: &system },
                Message { role: "user", content: message },
            ],
            max_tokens: self.max_tokens,
            stream: false,
        };

        let response = self
            .send(&body)
            .await?
            .json::<ChatResponse>()
            .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::Malformed("response has no choices".into()))?;

        Ok(TeachingResult::from_completion(&content))
    }
}
