//! Provider abstraction for STT and voice-separation back-ends.
//!
//! Providers are stateless value objects; credentials come from the
//! process-wide [`CredentialStore`](crate::config::CredentialStore) which is
//! refreshed on settings save. The registry caches built handles and
//! discards them on `update_factory()` so the next lookup re-evaluates
//! availability without a restart.

mod elevenlabs;
mod registry;
mod whisper;

pub use elevenlabs::ElevenLabsProvider;
pub use registry::ProviderRegistry;
pub use whisper::WhisperProvider;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::separation::SeparationOptions;
use crate::subtitle::{Subtitle, SubtitleEntry};
use crate::task::TaskContext;
use crate::Result;

/// A timed transcript span as returned by an STT provider.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    /// Start offset in seconds.
    pub start: f64,
    /// End offset in seconds.
    pub end: f64,
    /// Transcribed text.
    pub text: String,
}

/// A full transcription result.
#[derive(Debug, Clone, Default)]
pub struct Transcription {
    /// Whole-file transcript.
    pub text: String,
    /// Timed spans, in order.
    pub segments: Vec<TranscriptSegment>,
}

impl Transcription {
    /// Convert to the subtitle model, one entry per segment.
    pub fn to_subtitle(&self) -> Subtitle {
        let entries = self
            .segments
            .iter()
            .enumerate()
            .map(|(i, segment)| SubtitleEntry {
                index: i + 1,
                start: Duration::from_secs_f64(segment.start.max(0.0)),
                end: Duration::from_secs_f64(segment.end.max(segment.start).max(0.0)),
                text: segment.text.trim().to_string(),
            })
            .collect();
        Subtitle { entries }
    }
}

/// Speech-to-text back-end.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SttProvider: Send + Sync + std::fmt::Debug {
    /// Canonical provider name, e.g. `openai`.
    fn name(&self) -> &'static str;

    /// Upper-case tag used in output file names, e.g. `WHISPER`.
    fn tag(&self) -> &'static str;

    /// Whether the provider can be used right now (credential present).
    fn is_available(&self) -> bool;

    /// Upload and transcribe one audio file.
    ///
    /// `language` is a BCP-47-ish tag; empty/None lets the provider detect.
    async fn transcribe<'a>(
        &self,
        model: &str,
        audio_path: &Path,
        language: Option<&'a str>,
        initial_prompt: Option<&'a str>,
    ) -> Result<Transcription>;
}

/// Voice-separation back-end.
#[async_trait]
pub trait SeparationProvider: Send + Sync {
    /// Canonical provider name, e.g. `demucs`.
    fn name(&self) -> &'static str;

    /// Whether the provider can run on this host.
    fn is_available(&self) -> bool;

    /// Separate the vocals of `audio`, returning encoded bytes.
    async fn separate(
        &self,
        ctx: &TaskContext,
        audio: &Path,
        opts: &SeparationOptions,
    ) -> Result<Vec<u8>>;
}

/// One row of the model catalog exposed to the frontend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model name as used in requests.
    pub name: String,
    /// Display name.
    pub display_name: String,
    /// Short description.
    pub description: String,
    /// Owning provider.
    pub provider_name: String,
    /// Whether this is the suggested default.
    pub is_recommended: bool,
    /// Whether the vendor deprecated it.
    pub is_deprecated: bool,
    /// Whether the model accepts an initial prompt.
    pub takes_initial_prompt: bool,
    /// Availability probed from the underlying provider.
    pub is_available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcription_to_subtitle() {
        let transcription = Transcription {
            text: "hello world".into(),
            segments: vec![
                TranscriptSegment {
                    start: 0.5,
                    end: 2.0,
                    text: " hello ".into(),
                },
                TranscriptSegment {
                    start: 2.0,
                    end: 4.25,
                    text: "world".into(),
                },
            ],
        };
        let subtitle = transcription.to_subtitle();
        assert_eq!(subtitle.entries.len(), 2);
        assert_eq!(subtitle.entries[0].index, 1);
        assert_eq!(subtitle.entries[0].text, "hello");
        assert_eq!(subtitle.entries[1].end, Duration::from_millis(4250));
    }

    #[test]
    fn test_negative_timestamps_clamped() {
        let transcription = Transcription {
            text: "x".into(),
            segments: vec![TranscriptSegment {
                start: -1.0,
                end: -0.5,
                text: "x".into(),
            }],
        };
        let subtitle = transcription.to_subtitle();
        assert_eq!(subtitle.entries[0].start, Duration::ZERO);
        assert_eq!(subtitle.entries[0].end, Duration::ZERO);
    }
}
