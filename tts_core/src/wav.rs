use std::io::Cursor;

use base64::{engine::general_purpose, Engine as _};
use tracing::warn;

/// Combine per-sentence audio into one track, in the order given.
///
/// When every segment is a RIFF WAV with the same format, the PCM data is
/// merged under a single header so the result stays a valid WAV file.
/// Anything else (MP3, mixed formats) is concatenated byte for byte, which
/// frame-based formats tolerate.
pub fn combine_segments(segments: &[Vec<u8>]) -> Vec<u8> {
    match segments {
        [] => return Vec::new(),
        [only] => return only.clone(),
        _ => {}
    }

    if segments.iter().all(|s| s.starts_with(b"RIFF")) {
        match merge_wav(segments) {
            Ok(merged) => return merged,
            Err(e) => warn!("WAV merge failed, concatenating raw bytes: {e}"),
        }
    }

    segments.concat()
}

fn merge_wav(segments: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    let first = hound::WavReader::new(Cursor::new(&segments[0]))?;
    let spec = first.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        anyhow::bail!("unsupported WAV format: {:?}", spec);
    }

    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut out, spec)?;
        for segment in segments {
            let mut reader = hound::WavReader::new(Cursor::new(segment))?;
            if reader.spec() != spec {
                anyhow::bail!("segment format differs: {:?} vs {:?}", reader.spec(), spec);
            }
            for sample in reader.samples::<i16>() {
                writer.write_sample(sample?)?;
            }
        }
        writer.finalize()?;
    }
    Ok(out.into_inner())
}

/// Encode audio bytes as standard Base64.
pub fn encode_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}
