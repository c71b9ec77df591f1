use std::time::Duration;

use futures_util::StreamExt;
use llm_core::{GenerationError, GenerationEvent, GenerationService, PendingContext, TeachingResult};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use super::{AudioSegment, SentenceSegmenter, SynthesisDispatcher};

/// A fully consumed stream: terminal metadata plus ordered audio.
#[derive(Debug)]
pub struct StreamOutcome {
    pub result: TeachingResult,
    pub segments: Vec<AudioSegment>,
}

/// Diagnostics of a broken stream. The partial text is kept for logging
/// only and never reaches the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFailure {
    pub error: String,
    pub partial_text: String,
    pub sentences_dispatched: usize,
}

#[derive(Debug, Error)]
pub enum ConsumeError {
    /// Context building failed before any text was generated.
    #[error("context unavailable: {0}")]
    Context(String),

    #[error("stream failed: {}", .0.error)]
    Stream(StreamFailure),
}

/// Drives one generation stream through the segmenter into the dispatcher.
pub struct StreamConsumer<'a> {
    generator: &'a dyn GenerationService,
    segmenter: SentenceSegmenter,
    dispatcher: SynthesisDispatcher,
    accumulated: String,
    limit: Duration,
}

impl<'a> StreamConsumer<'a> {
    pub fn new(
        generator: &'a dyn GenerationService,
        segmenter: SentenceSegmenter,
        dispatcher: SynthesisDispatcher,
        limit: Duration,
    ) -> Self {
        Self {
            generator,
            segmenter,
            dispatcher,
            accumulated: String::new(),
            limit,
        }
    }

    /// Consume the stream to its end and wait for every synthesis call.
    ///
    /// The context is handed to the generator still pending, so it resolves
    /// while the stream is being opened. The whole run, audio included,
    /// must finish within `limit`. Any stream error consumes `self`, which
    /// drops the dispatcher and abandons in-flight synthesis.
    pub async fn run(
        mut self,
        message: &str,
        context: PendingContext,
    ) -> Result<StreamOutcome, ConsumeError> {
        let deadline = Instant::now() + self.limit;

        let mut stream = match timeout_at(deadline, self.generator.stream(message, context)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => return Err(self.timed_out()),
        };

        let mut terminal = None;
        loop {
            let item = match timeout_at(deadline, stream.next()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => return Err(self.timed_out()),
            };
            match item {
                Ok(GenerationEvent::Fragment(text)) => self.feed(&text),
                Ok(GenerationEvent::Final(result)) => {
                    terminal = Some(result);
                    break;
                }
                Err(e) => return Err(self.fail(e)),
            }
        }

        if let Some(unit) = self.segmenter.flush() {
            self.dispatcher.dispatch(unit);
        }

        let Some(result) = terminal else {
            return Err(self.fail(GenerationError::Incomplete));
        };

        let sentences_dispatched = self.dispatcher.dispatched();
        debug!(
            sentences = self.segmenter.emitted(),
            dispatched = sentences_dispatched,
            "stream complete, collecting audio"
        );
        let collected = timeout_at(deadline, self.dispatcher.collect(&self.accumulated)).await;
        match collected {
            Ok(segments) => Ok(StreamOutcome { result, segments }),
            Err(_) => Err(ConsumeError::Stream(StreamFailure {
                error: GenerationError::Timeout(self.limit).to_string(),
                partial_text: self.accumulated,
                sentences_dispatched,
            })),
        }
    }

    fn feed(&mut self, fragment: &str) {
        self.accumulated.push_str(fragment);
        for unit in self.segmenter.feed(fragment) {
            self.dispatcher.dispatch(unit);
        }
    }

    fn timed_out(self) -> ConsumeError {
        let limit = self.limit;
        self.fail(GenerationError::Timeout(limit))
    }

    fn fail(self, error: GenerationError) -> ConsumeError {
        match error {
            GenerationError::Context(reason) => ConsumeError::Context(reason),
            other => ConsumeError::Stream(StreamFailure {
                error: other.to_string(),
                sentences_dispatched: self.dispatcher.dispatched(),
                partial_text: self.accumulated,
            }),
        }
    }
}
