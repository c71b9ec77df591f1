// Configuration for the server and the teaching pipeline

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub llm_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub llm_provider: String,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub tts_base_url: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_format: String,
    pub tts_api_key: Option<String>,
    pub pipeline: PipelineConfig,
    pub lessons_path: String,
    pub history_turns: usize,
}

/// Knobs of the teaching pipeline itself.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sentences shorter than this are not flushed or synthesized.
    pub min_sentence_chars: usize,
    /// Upper bound on in-flight synthesis calls per request.
    pub max_concurrent_synthesis: usize,
    /// Bound on the streaming attempt, and separately on the fallback call.
    /// See [`ServerConfig::pipeline_config`] for how it fits the request
    /// budget.
    pub generation_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_sentence_chars: 5,
            max_concurrent_synthesis: 4,
            generation_timeout: Duration::from_secs(40),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            rate_limit_per_minute: 60,
            llm_timeout_secs: 40,
            request_timeout_secs: 120,
            cors_allowed_origins: None,
            llm_provider: "openai".to_string(),
            llm_model: None,
            llm_base_url: None,
            tts_base_url: "https://api.openai.com/v1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_format: "wav".to_string(),
            tts_api_key: None,
            pipeline: PipelineConfig::default(),
            lessons_path: "lessons.json".to_string(),
            history_turns: 6,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect()
            });

        let llm_timeout_secs = env_or("LLM_TIMEOUT_SECS", defaults.llm_timeout_secs);
        let pipeline = PipelineConfig {
            min_sentence_chars: env_or("MIN_SENTENCE_CHARS", defaults.pipeline.min_sentence_chars),
            max_concurrent_synthesis: env_or(
                "MAX_CONCURRENT_SYNTHESIS",
                defaults.pipeline.max_concurrent_synthesis,
            )
            .max(1),
            generation_timeout: Duration::from_secs(llm_timeout_secs),
        };

        Self {
            port: env_or("PORT", defaults.port),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            llm_timeout_secs,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            cors_allowed_origins,
            llm_provider: env_opt("LLM_PROVIDER").unwrap_or(defaults.llm_provider),
            llm_model: env_opt("LLM_MODEL"),
            llm_base_url: env_opt("LLM_BASE_URL"),
            tts_base_url: env_opt("TTS_BASE_URL").unwrap_or(defaults.tts_base_url),
            tts_model: env_opt("TTS_MODEL").unwrap_or(defaults.tts_model),
            tts_voice: env_opt("TTS_VOICE").unwrap_or(defaults.tts_voice),
            tts_format: env_opt("TTS_FORMAT").unwrap_or(defaults.tts_format),
            tts_api_key: env_opt("TTS_API_KEY").or_else(|| env_opt("OPENAI_API_KEY")),
            pipeline,
            lessons_path: env_opt("LESSONS_PATH").unwrap_or(defaults.lessons_path),
            history_turns: env_or("HISTORY_TURNS", defaults.history_turns),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Pipeline settings with the generation timeout capped at a third of
    /// the request timeout. A stalled stream, the single-shot retry and the
    /// retry's synthesis then all fit before the HTTP layer gives up.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let budget = self.request_timeout() / 3;
        let mut pipeline = self.pipeline.clone();
        if pipeline.generation_timeout > budget {
            warn!(
                "LLM_TIMEOUT_SECS={}s does not fit REQUEST_TIMEOUT_SECS={}s, using {}ms",
                pipeline.generation_timeout.as_secs(),
                self.request_timeout_secs,
                budget.as_millis()
            );
            pipeline.generation_timeout = budget;
        }
        pipeline
    }
}
