//! Two-tier control flow: a streaming attempt, then one single-shot retry.
//!
//! ```text
//! Streaming --StreamSucceeded--> Completed
//! Streaming --StreamErrored--> StreamFailed --RetryStarted--> Fallback
//! Fallback --FallbackSucceeded--> Completed
//! Fallback --FallbackErrored--> FallbackFailed
//! ```
//!
//! `Completed` and `FallbackFailed` are terminal. Context failures never
//! enter this machine: a request whose context cannot be built fails
//! without a retry.

use std::sync::Arc;

use futures_util::FutureExt;
use llm_core::{GenerationError, PendingContext, TeachingResult};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::{
    assemble, persist_detached, AudioSegment, ConsumeError, PipelineError, SentenceSegmenter,
    StreamConsumer, StreamOutcome, SynthesisDispatcher, TeachingPipeline,
    TeachingRequest, TeachingResponse,
};
use crate::persistence::Interaction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Streaming,
    StreamFailed {
        error: String,
    },
    Fallback {
        stream_error: String,
    },
    FallbackFailed {
        stream_error: String,
        fallback_error: String,
    },
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StreamSucceeded,
    StreamErrored(String),
    RetryStarted,
    FallbackSucceeded,
    FallbackErrored(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid pipeline transition: {event} in state {from}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub event: &'static str,
}

impl PipelineState {
    pub fn transition(self, event: PipelineEvent) -> Result<Self, InvalidTransition> {
        use PipelineEvent as E;
        use PipelineState as S;

        match (self, event) {
            (S::Streaming, E::StreamSucceeded) => Ok(S::Completed),
            (S::Streaming, E::StreamErrored(error)) => Ok(S::StreamFailed { error }),
            (S::StreamFailed { error }, E::RetryStarted) => Ok(S::Fallback {
                stream_error: error,
            }),
            (S::Fallback { .. }, E::FallbackSucceeded) => Ok(S::Completed),
            (S::Fallback { stream_error }, E::FallbackErrored(fallback_error)) => {
                Ok(S::FallbackFailed {
                    stream_error,
                    fallback_error,
                })
            }
            (state, event) => Err(InvalidTransition {
                from: state.name(),
                event: event.name(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::StreamFailed { .. } => "stream_failed",
            Self::Fallback { .. } => "fallback",
            Self::FallbackFailed { .. } => "fallback_failed",
            Self::Completed => "completed",
        }
    }
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamSucceeded => "stream_succeeded",
            Self::StreamErrored(_) => "stream_errored",
            Self::RetryStarted => "retry_started",
            Self::FallbackSucceeded => "fallback_succeeded",
            Self::FallbackErrored(_) => "fallback_errored",
        }
    }
}

/// Why the single-shot path did not produce a result.
enum RetryError {
    Context(String),
    Failed(String),
}

impl TeachingPipeline {
    /// Answer one validated request.
    ///
    /// Streams first; if the stream breaks for any reason other than the
    /// context, everything it produced is discarded and the request is
    /// answered by the single-shot path instead.
    pub async fn run(&self, request: &TeachingRequest) -> Result<TeachingResponse, PipelineError> {
        let context = self.spawn_context(request);
        let mut state = PipelineState::Streaming;

        let (result, segments) = match self.stream_attempt(request, context.clone()).await {
            Ok(outcome) => {
                state = state.transition(PipelineEvent::StreamSucceeded)?;
                self.metrics.record_streaming_completion();
                (outcome.result, outcome.segments)
            }
            Err(ConsumeError::Context(reason)) => return Err(self.context_failed(request, reason)),
            Err(ConsumeError::Stream(failure)) => {
                warn!(
                    session_id = %request.session_id,
                    error = %failure.error,
                    partial_chars = failure.partial_text.len(),
                    sentences = failure.sentences_dispatched,
                    "stream failed, discarding partial response and retrying"
                );
                state = state
                    .transition(PipelineEvent::StreamErrored(failure.error))?
                    .transition(PipelineEvent::RetryStarted)?;

                match self.single_shot(request, context).await {
                    Ok(done) => {
                        state = state.transition(PipelineEvent::FallbackSucceeded)?;
                        self.metrics.record_fallback(true);
                        done
                    }
                    Err(RetryError::Context(reason)) => {
                        return Err(self.context_failed(request, reason))
                    }
                    Err(RetryError::Failed(reason)) => {
                        self.metrics.record_fallback(false);
                        let failed = state.transition(PipelineEvent::FallbackErrored(reason))?;
                        return Err(fallback_error(failed));
                    }
                }
            }
        };

        debug!(session_id = %request.session_id, state = state.name(), "assembling response");
        let response = assemble(result, segments);
        persist_detached(
            Arc::clone(&self.sink),
            self.metrics.clone(),
            request.session_id.clone(),
            Interaction::new(request.user_message.clone(), response.display_text.clone()),
        );
        Ok(response)
    }

    /// Start building the context on its own task so it overlaps with
    /// opening the stream. The result is cached for the retry.
    fn spawn_context(&self, request: &TeachingRequest) -> PendingContext {
        let builder = Arc::clone(&self.context);
        let (user_id, session_id, lesson_id) = (
            request.user_id.clone(),
            request.session_id.clone(),
            request.lesson_id.clone(),
        );
        let handle = tokio::spawn(async move {
            builder
                .build(&user_id, &session_id, &lesson_id)
                .await
                .map_err(|e| format!("{e:#}"))
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(format!("context task failed: {e}")))
        }
        .boxed()
        .shared()
    }

    async fn stream_attempt(
        &self,
        request: &TeachingRequest,
        context: PendingContext,
    ) -> Result<StreamOutcome, ConsumeError> {
        StreamConsumer::new(
            self.generator.as_ref(),
            SentenceSegmenter::new(self.config.min_sentence_chars),
            SynthesisDispatcher::new(
                Arc::clone(&self.synthesizer),
                self.config.max_concurrent_synthesis,
                self.config.min_sentence_chars,
                self.metrics.clone(),
            ),
            self.config.generation_timeout,
        )
        .run(&request.user_message, context)
        .await
    }

    /// One generation call for the complete text, then one synthesis call
    /// over it. Waiting for the context and generating share one deadline.
    async fn single_shot(
        &self,
        request: &TeachingRequest,
        context: PendingContext,
    ) -> Result<(TeachingResult, Vec<AudioSegment>), RetryError> {
        info!(session_id = %request.session_id, "running single-shot fallback");
        let limit = self.config.generation_timeout;
        let deadline = Instant::now() + limit;

        let context = timeout_at(deadline, context)
            .await
            .map_err(|_| {
                RetryError::Context(format!("context not ready after {}s", limit.as_secs()))
            })?
            .map_err(RetryError::Context)?;

        let result = timeout_at(deadline, self.generator.complete(&request.user_message, &context))
            .await
            .map_err(|_| RetryError::Failed(GenerationError::Timeout(limit).to_string()))?
            .map_err(|e| RetryError::Failed(e.to_string()))?;

        if result.audio_text.trim().is_empty() {
            return Ok((result, Vec::new()));
        }

        match self.synthesizer.synthesize(&result.audio_text).await {
            Ok(audio) => {
                self.metrics.record_synthesis(true);
                let segment = AudioSegment {
                    sequence_index: 0,
                    audio: Some(audio),
                };
                Ok((result, vec![segment]))
            }
            Err(e) => {
                self.metrics.record_synthesis(false);
                Err(RetryError::Failed(format!("synthesis failed: {e:#}")))
            }
        }
    }

    fn context_failed(&self, request: &TeachingRequest, reason: String) -> PipelineError {
        self.metrics.record_context_failure();
        warn!(
            session_id = %request.session_id,
            lesson_id = %request.lesson_id,
            error = %reason,
            "context unavailable, request cannot be answered"
        );
        PipelineError::Context(reason)
    }
}

fn fallback_error(state: PipelineState) -> PipelineError {
    match state {
        PipelineState::FallbackFailed {
            stream_error,
            fallback_error,
        } => {
            error!(
                stream_error = %stream_error,
                fallback_error = %fallback_error,
                "fallback failed after stream failure"
            );
            PipelineError::Fallback {
                stream_error,
                fallback_error,
            }
        }
        other => PipelineError::InvalidState(InvalidTransition {
            from: other.name(),
            event: PipelineEvent::FallbackErrored(String::new()).name(),
        }),
    }
}
