//! Generation side of the teaching pipeline.
//!
//! Exposes the [`GenerationService`] trait the server drives (one streaming
//! call, one single-shot call) together with an OpenAI-compatible HTTP
//! implementation, [`LlmClient`].

mod client;
mod filter;
mod result;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{LlmClient, LlmProvider};
pub use result::{TeachingResult, LESSON_COMPLETE_MARKER};

/// Opaque payload produced by the context builder and handed to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LessonContext(pub serde_json::Value);

impl LessonContext {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Render the context for inclusion in a system prompt.
    pub fn to_prompt(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_default()
    }
}

/// A context that may still be resolving.
///
/// The streaming call receives this instead of a resolved [`LessonContext`]
/// so that context building runs while the stream is being set up. It is
/// `Shared`, so the caller can keep a clone and await the same result later
/// (the fallback path does this) without building the context twice.
pub type PendingContext = Shared<BoxFuture<'static, Result<LessonContext, String>>>;

/// One item of a generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// A chunk of spoken text, in arrival order.
    Fragment(String),
    /// Terminal metadata; always the last item of a successful stream.
    Final(TeachingResult),
}

pub type FragmentStream =
    Pin<Box<dyn Stream<Item = Result<GenerationEvent, GenerationError>> + Send>>;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("context unavailable: {0}")]
    Context(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("stream ended before the terminal result")]
    Incomplete,

    #[error("no response within {}s", .0.as_secs())]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Open a generation stream. Implementations await `context` only when
    /// they are ready to send the request.
    async fn stream(
        &self,
        message: &str,
        context: PendingContext,
    ) -> Result<FragmentStream, GenerationError>;

    /// Produce the complete result in one call, without fragments.
    async fn complete(
        &self,
        message: &str,
        context: &LessonContext,
    ) -> Result<TeachingResult, GenerationError>;
}
