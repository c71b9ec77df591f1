use std::sync::Arc;

use llm_core::TeachingResult;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tts_core::combine_segments;

use super::{AudioSegment, TeachingResponse};
use crate::metrics::PipelineMetrics;
use crate::persistence::{Interaction, InteractionSink};

/// Merge terminal metadata and ordered audio into the outward response.
/// Segments without audio are skipped.
pub fn assemble(result: TeachingResult, mut segments: Vec<AudioSegment>) -> TeachingResponse {
    segments.sort_by_key(|s| s.sequence_index);
    let audio: Vec<Vec<u8>> = segments.into_iter().filter_map(|s| s.audio).collect();

    TeachingResponse {
        display_text: result.display_text,
        audio_text: result.audio_text,
        diagram: result.diagram,
        combined_audio: combine_segments(&audio),
        lesson_complete: result.lesson_complete,
    }
}

/// Save an interaction on a detached task.
///
/// The caller never waits on the returned handle in production; a failed
/// save is logged and counted, and cannot reach the response.
pub fn persist_detached(
    sink: Arc<dyn InteractionSink>,
    metrics: PipelineMetrics,
    session_id: String,
    interaction: Interaction,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match sink.save(&session_id, interaction).await {
            Ok(()) => debug!(session_id = %session_id, "interaction saved"),
            Err(e) => {
                metrics.record_persistence_failure();
                warn!(session_id = %session_id, error = %e, "failed to persist interaction");
            }
        }
    })
}
