//! Speech synthesis for the teaching pipeline: the [`SpeechSynthesizer`]
//! seam, an OpenAI-compatible HTTP backend, and helpers to combine and
//! encode the resulting audio track.

mod http;
mod text;
mod wav;

use async_trait::async_trait;

pub use http::HttpSynthesizer;
pub use text::clean_text_for_speech;
pub use wav::{combine_segments, encode_base64};

/// Turns text into encoded audio bytes (WAV, MP3, ...).
///
/// Implementations must be safe to call concurrently; the pipeline issues
/// one call per sentence and runs them in parallel.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>>;
}
