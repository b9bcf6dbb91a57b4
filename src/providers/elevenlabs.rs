//! ElevenLabs Scribe transcription client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tokio::fs::File;
use tokio_util::codec::{BytesCodec, FramedRead};

use crate::config::CredentialStore;
use crate::error::LangkitError;
use crate::Result;

use super::{SttProvider, TranscriptSegment, Transcription};

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io/v1";

/// Longest silence absorbed into one subtitle span.
const SEGMENT_GAP: Duration = Duration::from_millis(900);
/// Upper bound on words per span before a forced break.
const SEGMENT_MAX_WORDS: usize = 14;

/// ElevenLabs Scribe provider (`scribe_v1`).
#[derive(Debug)]
pub struct ElevenLabsProvider {
    client: Client,
    credentials: Arc<CredentialStore>,
    base_url: String,
}

impl ElevenLabsProvider {
    /// Create a provider reading the `elevenlabs` credential from the store.
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self::with_base_url(credentials, DEFAULT_BASE_URL.to_string())
    }

    /// Create a provider against an explicit endpoint (tests, proxies).
    pub fn with_base_url(credentials: Arc<CredentialStore>, base_url: String) -> Self {
        Self {
            client: Client::new(),
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SttProvider for ElevenLabsProvider {
    fn name(&self) -> &'static str {
        "elevenlabs"
    }

    fn tag(&self) -> &'static str {
        "SCRIBE"
    }

    fn is_available(&self) -> bool {
        self.credentials.has("elevenlabs")
    }

    async fn transcribe<'a>(
        &self,
        model: &str,
        audio_path: &Path,
        language: Option<&'a str>,
        _initial_prompt: Option<&'a str>,
    ) -> Result<Transcription> {
        let api_key = self.credentials.get("elevenlabs").ok_or_else(|| {
            LangkitError::provider_unavailable("elevenlabs", "no API key configured")
        })?;

        let file = File::open(audio_path).await.map_err(|e| {
            LangkitError::media(format!(
                "failed to open {} for upload: {}",
                audio_path.display(),
                e
            ))
        })?;
        let stream = FramedRead::new(file, BytesCodec::new());
        let body = reqwest::Body::wrap_stream(stream);
        let filename = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());

        let mut form = Form::new().text("model_id", model.to_string()).part(
            "file",
            Part::stream(body)
                .file_name(filename)
                .mime_str("application/octet-stream")?,
        );
        if let Some(language) = language.filter(|l| !l.is_empty()) {
            form = form.text("language_code", language.to_string());
        }

        let response = self
            .client
            .post(format!("{}/speech-to-text", self.base_url))
            .header("xi-api-key", api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LangkitError::provider_unavailable(
                "elevenlabs",
                format!("credential rejected (HTTP {})", status),
            ));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LangkitError::transient(format!(
                "transcription request failed with HTTP {}: {}",
                status, text
            )));
        }

        let parsed: ScribeResponse = response.json().await.map_err(|e| {
            LangkitError::transient(format!("unparseable transcription response: {}", e))
        })?;
        Ok(parsed.into_transcription())
    }
}

#[derive(Debug, Deserialize)]
struct ScribeResponse {
    text: String,
    #[serde(default)]
    words: Vec<ScribeWord>,
}

#[derive(Debug, Deserialize)]
struct ScribeWord {
    text: String,
    start: f64,
    end: f64,
    #[serde(default, rename = "type")]
    kind: String,
}

impl ScribeResponse {
    /// Scribe returns word-level timings only; group words into spans at
    /// silence gaps or a word-count ceiling.
    fn into_transcription(self) -> Transcription {
        let mut segments: Vec<TranscriptSegment> = Vec::new();
        let mut current: Vec<&ScribeWord> = Vec::new();

        let words: Vec<&ScribeWord> = self
            .words
            .iter()
            .filter(|w| w.kind.is_empty() || w.kind == "word")
            .collect();

        let flush = |current: &mut Vec<&ScribeWord>, segments: &mut Vec<TranscriptSegment>| {
            if current.is_empty() {
                return;
            }
            let text = current
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            segments.push(TranscriptSegment {
                start: current.first().unwrap().start,
                end: current.last().unwrap().end,
                text,
            });
            current.clear();
        };

        for word in words {
            if let Some(last) = current.last() {
                let gap = Duration::from_secs_f64((word.start - last.end).max(0.0));
                if gap > SEGMENT_GAP || current.len() >= SEGMENT_MAX_WORDS {
                    flush(&mut current, &mut segments);
                }
            }
            current.push(word);
        }
        flush(&mut current, &mut segments);

        Transcription {
            text: self.text,
            segments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_word_grouping_splits_on_gap() {
        let response = ScribeResponse {
            text: "one two three".into(),
            words: vec![
                ScribeWord {
                    text: "one".into(),
                    start: 0.0,
                    end: 0.4,
                    kind: "word".into(),
                },
                ScribeWord {
                    text: "two".into(),
                    start: 0.5,
                    end: 0.9,
                    kind: "word".into(),
                },
                ScribeWord {
                    text: "three".into(),
                    start: 3.0,
                    end: 3.4,
                    kind: "word".into(),
                },
            ],
        };
        let transcription = response.into_transcription();
        assert_eq!(transcription.segments.len(), 2);
        assert_eq!(transcription.segments[0].text, "one two");
        assert_eq!(transcription.segments[1].text, "three");
    }

    #[tokio::test]
    async fn test_transcribe_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/speech-to-text"))
            .and(header("xi-api-key", "xi-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "konnichiwa",
                "words": [
                    {"text": "konnichiwa", "start": 0.1, "end": 0.9, "type": "word"}
                ]
            })))
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let audio = tmp.path().join("clip.wav");
        std::fs::write(&audio, b"RIFF").unwrap();

        let store = Arc::new(CredentialStore::new());
        store.set("elevenlabs", "xi-secret");
        let provider = ElevenLabsProvider::with_base_url(store, server.uri());
        let result = provider
            .transcribe("scribe_v1", &audio, Some("ja"), None)
            .await
            .unwrap();
        assert_eq!(result.text, "konnichiwa");
        assert_eq!(result.segments.len(), 1);
    }
}
