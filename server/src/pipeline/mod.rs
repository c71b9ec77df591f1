//! Incremental teaching-response pipeline.
//!
//! A validated [`TeachingRequest`] is streamed through the generation
//! service; text fragments are split into sentences by the
//! [`SentenceSegmenter`], each sentence is synthesized concurrently by the
//! [`SynthesisDispatcher`], and the ordered audio is merged by the
//! assembler. If the stream breaks, the whole request is retried through a
//! single-shot path (see [`fallback`]).

mod assembler;
mod consumer;
mod dispatcher;
pub mod fallback;
mod segmenter;

use std::sync::Arc;

use llm_core::GenerationService;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tts_core::SpeechSynthesizer;

use crate::config::PipelineConfig;
use crate::context::ContextBuilder;
use crate::metrics::PipelineMetrics;
use crate::persistence::InteractionSink;

pub use assembler::{assemble, persist_detached};
pub use consumer::{ConsumeError, StreamConsumer, StreamFailure, StreamOutcome};
pub use dispatcher::SynthesisDispatcher;
pub use fallback::{InvalidTransition, PipelineEvent, PipelineState};
pub use segmenter::SentenceSegmenter;

/// A request that passed validation. Immutable for the rest of its life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingRequest {
    pub user_id: String,
    pub session_id: String,
    pub lesson_id: String,
    pub user_message: String,
}

/// One complete sentence, numbered in order of appearance from 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceUnit {
    pub text: String,
    pub sequence_index: usize,
}

/// Synthesized audio for one sentence. `audio: None` records a synthesis
/// failure for that sentence; it is skipped when the track is combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub sequence_index: usize,
    pub audio: Option<Vec<u8>>,
}

/// The assembled answer. Built exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeachingResponse {
    pub display_text: String,
    pub audio_text: String,
    pub diagram: Option<String>,
    pub combined_audio: Vec<u8>,
    pub lesson_complete: bool,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The context builder failed; no generation call was made.
    #[error("context unavailable: {0}")]
    Context(String),

    /// Both the streaming attempt and the single-shot retry failed.
    #[error("streaming failed ({stream_error}); fallback failed ({fallback_error})")]
    Fallback {
        stream_error: String,
        fallback_error: String,
    },

    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),
}

/// Everything a request needs from the outside world. Clients are stateless
/// and shared by every concurrent request.
pub struct TeachingPipeline {
    pub(crate) generator: Arc<dyn GenerationService>,
    pub(crate) synthesizer: Arc<dyn SpeechSynthesizer>,
    pub(crate) context: Arc<dyn ContextBuilder>,
    pub(crate) sink: Arc<dyn InteractionSink>,
    pub(crate) config: PipelineConfig,
    pub(crate) metrics: PipelineMetrics,
}

impl TeachingPipeline {
    pub fn new(
        generator: Arc<dyn GenerationService>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        context: Arc<dyn ContextBuilder>,
        sink: Arc<dyn InteractionSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            context,
            sink,
            config,
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }
}

#[cfg(test)]
pub(crate) mod testing;
