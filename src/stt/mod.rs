//! Speech-to-text engine: upload, transcribe, emit subtitles.
//!
//! The retry policy wraps the whole upload + transcribe call; every attempt
//! runs under a fresh timeout while the parent task scope carries none.
//! Cancellation aborts retries immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::error::LangkitError;
use crate::progress::importance::BAR_STT_PROCESS;
use crate::providers::{ProviderRegistry, SttProvider, Transcription};
use crate::retry::RetryPolicy;
use crate::subtitle::tagged_output_path;
use crate::task::{SttOptions, TaskContext};
use crate::Result;

/// Transcription engine over the provider registry.
pub struct SttEngine {
    registry: Arc<ProviderRegistry>,
}

impl SttEngine {
    /// Create an engine resolving providers through the registry.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Transcribe `audio` and write `<base>.<TAG>.srt` next to `media`.
    ///
    /// Returns the path of the written subtitle file.
    pub async fn transcribe_to_subtitle(
        &self,
        ctx: &TaskContext,
        media: &Path,
        audio: &Path,
        language: &str,
        opts: &SttOptions,
    ) -> Result<PathBuf> {
        let provider = self.registry.get_stt_for_model(&opts.model)?;
        self.run(ctx, provider, media, audio, language, opts).await
    }

    /// Transcribe with an already-resolved provider.
    pub async fn run(
        &self,
        ctx: &TaskContext,
        provider: Arc<dyn SttProvider>,
        media: &Path,
        audio: &Path,
        language: &str,
        opts: &SttOptions,
    ) -> Result<PathBuf> {
        ctx.check_cancelled()?;
        ctx.reporter.update(
            BAR_STT_PROCESS,
            0,
            100,
            "transcribe",
            &format!("Transcribing with {}", opts.model),
        );

        let language = if language.is_empty() {
            None
        } else {
            Some(language)
        };
        let policy = RetryPolicy::with_max_attempts(opts.max_try);
        let transcription = policy
            .run(|| self.attempt(ctx, provider.as_ref(), audio, language, opts))
            .await?;

        let subtitle = normalize(transcription, audio)?;
        let out_path = tagged_output_path(media, provider.tag());
        subtitle.save(&out_path)?;
        ctx.reporter.update(
            BAR_STT_PROCESS,
            100,
            100,
            "transcribe",
            "Transcription complete",
        );
        info!("wrote {}", out_path.display());
        Ok(out_path)
    }

    /// One attempt under a fresh child timeout; the parent scope only ever
    /// cancels, it never times out.
    async fn attempt(
        &self,
        ctx: &TaskContext,
        provider: &dyn SttProvider,
        audio: &Path,
        language: Option<&str>,
        opts: &SttOptions,
    ) -> Result<Transcription> {
        let timeout = Duration::from_secs(u64::from(opts.timeout_seconds.max(1)));
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(LangkitError::Cancelled),
            result = tokio::time::timeout(
                timeout,
                provider.transcribe(&opts.model, audio, language, opts.initial_prompt.as_deref()),
            ) => match result {
                Ok(inner) => inner,
                Err(_) => Err(LangkitError::transient(format!(
                    "transcription attempt timed out after {:?}",
                    timeout
                ))),
            },
        }
    }
}

/// A transcription with no timed segments still produces a valid subtitle
/// file carrying the whole text in one entry.
fn normalize(transcription: Transcription, audio: &Path) -> Result<crate::subtitle::Subtitle> {
    if transcription.segments.is_empty() && transcription.text.trim().is_empty() {
        return Err(LangkitError::transient(format!(
            "provider returned an empty transcription for {}",
            audio.display()
        )));
    }
    if transcription.segments.is_empty() {
        return Ok(crate::subtitle::Subtitle {
            entries: vec![crate::subtitle::SubtitleEntry {
                index: 1,
                start: Duration::ZERO,
                end: Duration::from_secs(5),
                text: transcription.text.trim().to_string(),
            }],
        });
    }
    Ok(transcription.to_subtitle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialStore;
    use crate::event::{EventHub, EventSink, EventThrottler};
    use crate::progress::{compute_importance_map, ProgressReporter};
    use crate::providers::{MockSttProvider, TranscriptSegment};
    use crate::task::{FeatureSet, Mode};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn test_ctx() -> TaskContext {
        let hub = Arc::new(EventHub::new(64));
        let throttler = Arc::new(EventThrottler::new(hub as Arc<dyn EventSink>));
        let map = compute_importance_map(
            Mode::Subs2Dubs,
            false,
            &FeatureSet {
                stt: true,
                ..FeatureSet::default()
            },
        );
        TaskContext::new(CancellationToken::new(), ProgressReporter::new(throttler, map))
    }

    fn stt_opts() -> SttOptions {
        SttOptions {
            model: "whisper-1".into(),
            initial_prompt: None,
            timeout_seconds: 10,
            max_try: 2,
        }
    }

    #[tokio::test]
    async fn test_writes_provider_suffixed_srt() {
        let tmp = TempDir::new().unwrap();
        let media = tmp.path().join("demo.mp4");
        let audio = tmp.path().join("demo.wav");
        std::fs::write(&media, b"").unwrap();
        std::fs::write(&audio, b"RIFF").unwrap();

        let mut provider = MockSttProvider::new();
        provider.expect_tag().return_const("WHISPER");
        provider.expect_transcribe().returning(|_, _, _, _| {
            Ok(Transcription {
                text: "hello".into(),
                segments: vec![TranscriptSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "hello".into(),
                }],
            })
        });

        let engine = SttEngine::new(Arc::new(crate::providers::ProviderRegistry::new(Arc::new(
            CredentialStore::new(),
        ))));
        let ctx = test_ctx();
        let out = engine
            .run(&ctx, Arc::new(provider), &media, &audio, "ja", &stt_opts())
            .await
            .unwrap();

        assert_eq!(out, tmp.path().join("demo.WHISPER.srt"));
        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.contains("hello"));
        assert!(!written.contains('\r'));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let tmp = TempDir::new().unwrap();
        let media = tmp.path().join("demo.mp4");
        let audio = tmp.path().join("demo.wav");
        std::fs::write(&media, b"").unwrap();
        std::fs::write(&audio, b"RIFF").unwrap();

        let mut provider = MockSttProvider::new();
        provider.expect_tag().return_const("WHISPER");
        let mut call = 0;
        provider.expect_transcribe().returning(move |_, _, _, _| {
            call += 1;
            if call == 1 {
                Err(LangkitError::transient("HTTP 503"))
            } else {
                Ok(Transcription {
                    text: "ok".into(),
                    segments: vec![TranscriptSegment {
                        start: 0.0,
                        end: 1.0,
                        text: "ok".into(),
                    }],
                })
            }
        });

        let engine = SttEngine::new(Arc::new(crate::providers::ProviderRegistry::new(Arc::new(
            CredentialStore::new(),
        ))));
        let ctx = test_ctx();
        let out = engine
            .run(&ctx, Arc::new(provider), &media, &audio, "", &stt_opts())
            .await
            .unwrap();
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_cancellation_aborts_retries() {
        let tmp = TempDir::new().unwrap();
        let media = tmp.path().join("demo.mp4");
        let audio = tmp.path().join("demo.wav");
        std::fs::write(&media, b"").unwrap();
        std::fs::write(&audio, b"RIFF").unwrap();

        let mut provider = MockSttProvider::new();
        provider.expect_tag().return_const("WHISPER");
        provider.expect_transcribe().times(0..=1).returning(|_, _, _, _| {
            Err(LangkitError::transient("should not matter"))
        });

        let ctx = test_ctx();
        ctx.cancel.cancel();
        let engine = SttEngine::new(Arc::new(crate::providers::ProviderRegistry::new(Arc::new(
            CredentialStore::new(),
        ))));
        let err = engine
            .run(&ctx, Arc::new(provider), &media, &audio, "", &stt_opts())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_normalize_empty_segments_falls_back_to_text() {
        let transcription = Transcription {
            text: "just text".into(),
            segments: vec![],
        };
        let subtitle = normalize(transcription, Path::new("a.wav")).unwrap();
        assert_eq!(subtitle.entries.len(), 1);
        assert_eq!(subtitle.entries[0].text, "just text");
    }
}
