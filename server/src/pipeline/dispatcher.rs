use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tts_core::SpeechSynthesizer;

use super::{AudioSegment, SentenceUnit};
use crate::metrics::PipelineMetrics;

/// Fans sentences out to the synthesizer and reassembles the results by
/// sequence index.
///
/// `dispatch` never blocks: each sentence becomes its own task, bounded by a
/// semaphore. `collect` waits for every task and places each result in the
/// slot of its sequence index, so completion order never affects the track.
/// Dropping the dispatcher abandons whatever is still in flight.
pub struct SynthesisDispatcher {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<(usize, Option<Vec<u8>>)>,
    min_chars: usize,
    metrics: PipelineMetrics,
    dispatched: usize,
}

impl SynthesisDispatcher {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        max_concurrent: usize,
        min_chars: usize,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            synthesizer,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tasks: JoinSet::new(),
            min_chars,
            metrics,
            dispatched: 0,
        }
    }

    /// Schedule synthesis of one sentence. Returns `false` when the sentence
    /// is too short or has no letters and was skipped.
    pub fn dispatch(&mut self, unit: SentenceUnit) -> bool {
        if !is_audible(&unit.text, self.min_chars) {
            debug!(index = unit.sequence_index, text = %unit.text, "skipping inaudible sentence");
            return false;
        }

        let synthesizer = Arc::clone(&self.synthesizer);
        let permits = Arc::clone(&self.permits);
        let metrics = self.metrics.clone();
        let SentenceUnit {
            text,
            sequence_index: index,
        } = unit;

        self.tasks.spawn(async move {
            // The semaphore is never closed, so acquire only fails if it were.
            let _permit = permits.acquire_owned().await.ok();
            match synthesizer.synthesize(&text).await {
                Ok(audio) => {
                    metrics.record_synthesis(true);
                    (index, Some(audio))
                }
                Err(e) => {
                    metrics.record_synthesis(false);
                    warn!(index, error = %e, "sentence synthesis failed, dropping its audio");
                    (index, None)
                }
            }
        });
        self.dispatched += 1;
        true
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Wait for every dispatched sentence and return the segments in strictly
    /// increasing sequence order. Failed sentences come back with no audio.
    ///
    /// If no segment carries audio, `full_text` is synthesized once as a
    /// single segment; if that fails too the result is empty.
    pub async fn collect(mut self, full_text: &str) -> Vec<AudioSegment> {
        let mut slots: Vec<Option<AudioSegment>> = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((index, audio)) => {
                    if slots.len() <= index {
                        slots.resize_with(index + 1, || None);
                    }
                    slots[index] = Some(AudioSegment {
                        sequence_index: index,
                        audio,
                    });
                }
                Err(e) => {
                    self.metrics.record_synthesis(false);
                    warn!(error = %e, "synthesis task did not complete");
                }
            }
        }

        let segments: Vec<AudioSegment> = slots.into_iter().flatten().collect();
        if segments.iter().any(|s| s.audio.is_some()) {
            return segments;
        }

        self.synthesize_whole(full_text).await
    }

    async fn synthesize_whole(&self, full_text: &str) -> Vec<AudioSegment> {
        let text = full_text.trim();
        if !is_audible(text, self.min_chars) {
            return Vec::new();
        }

        info!(
            sentences = self.dispatched,
            chars = text.len(),
            "no sentence audio produced, synthesizing full text"
        );
        match self.synthesizer.synthesize(text).await {
            Ok(audio) => {
                self.metrics.record_synthesis(true);
                vec![AudioSegment {
                    sequence_index: 0,
                    audio: Some(audio),
                }]
            }
            Err(e) => {
                self.metrics.record_synthesis(false);
                warn!(error = %e, "full-text synthesis failed, response will have no audio");
                Vec::new()
            }
        }
    }
}

/// Minimum-content guard: enough characters and at least one letter.
fn is_audible(text: &str, min_chars: usize) -> bool {
    let text = text.trim();
    text.chars().count() >= min_chars && text.chars().any(char::is_alphabetic)
}
