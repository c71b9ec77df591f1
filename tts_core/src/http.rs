use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::{clean_text_for_speech, SpeechSynthesizer};

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

/// Client for an OpenAI-compatible `/audio/speech` endpoint.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    format: String,
}

impl HttpSynthesizer {
    pub fn new(base_url: &str, model: &str, voice: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            model: model.to_string(),
            voice: voice.to_string(),
            format: "wav".to_string(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Output container requested from the service. Defaults to `wav` so
    /// segments can be merged into a single valid file.
    pub fn with_format(mut self, format: &str) -> Self {
        self.format = format.to_string();
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        let input = clean_text_for_speech(text);
        if input.is_empty() {
            anyhow::bail!("nothing to synthesize");
        }

        let body = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: &input,
            response_format: &self.format,
        };
        let mut request = self
            .http
            .post(format!("{}/audio/speech", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("speech request failed")?
            .error_for_status()
            .context("speech service returned an error")?;
        let bytes = response.bytes().await.context("failed to read audio body")?;
        debug!(chars = input.len(), bytes = bytes.len(), "synthesized speech");
        Ok(bytes.to_vec())
    }
}
