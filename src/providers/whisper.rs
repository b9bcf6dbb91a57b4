//! OpenAI Whisper-family transcription client.

use std::path::Path;
use std::sync::Arc;

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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI transcription provider (`whisper-1`, `gpt-4o-transcribe`).
#[derive(Debug)]
pub struct WhisperProvider {
    client: Client,
    credentials: Arc<CredentialStore>,
    base_url: String,
}

impl WhisperProvider {
    /// Create a provider reading the `openai` credential from the store.
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

    fn api_key(&self) -> Result<String> {
        self.credentials
            .get("openai")
            .ok_or_else(|| LangkitError::provider_unavailable("openai", "no API key configured"))
    }
}

#[async_trait]
impl SttProvider for WhisperProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn tag(&self) -> &'static str {
        "WHISPER"
    }

    fn is_available(&self) -> bool {
        self.credentials.has("openai")
    }

    async fn transcribe<'a>(
        &self,
        model: &str,
        audio_path: &Path,
        language: Option<&'a str>,
        initial_prompt: Option<&'a str>,
    ) -> Result<Transcription> {
        let api_key = self.api_key()?;

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
        let mut form = Form::new()
            .text("model", model.to_string())
            .text("response_format", "verbose_json")
            .part(
                "file",
                Part::stream(body)
                    .file_name(filename)
                    .mime_str("application/octet-stream")?,
            );
        if let Some(language) = language.filter(|l| !l.is_empty()) {
            form = form.text("language", language.to_string());
        }
        if let Some(prompt) = initial_prompt.filter(|p| !p.is_empty()) {
            form = form.text("prompt", prompt.to_string());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LangkitError::provider_unavailable(
                "openai",
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

        let parsed: WhisperResponse = response.json().await.map_err(|e| {
            LangkitError::transient(format!("unparseable transcription response: {}", e))
        })?;
        Ok(parsed.into())
    }
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

impl From<WhisperResponse> for Transcription {
    fn from(response: WhisperResponse) -> Self {
        Transcription {
            text: response.text,
            segments: response
                .segments
                .into_iter()
                .map(|s| TranscriptSegment {
                    start: s.start,
                    end: s.end,
                    text: s.text,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_with_key() -> Arc<CredentialStore> {
        let store = Arc::new(CredentialStore::new());
        store.set("openai", "sk-test");
        store
    }

    #[test]
    fn test_availability_follows_credential() {
        let store = Arc::new(CredentialStore::new());
        let provider = WhisperProvider::new(store.clone());
        assert!(!provider.is_available());
        store.set("openai", "sk-test");
        assert!(provider.is_available());
    }

    #[tokio::test]
    async fn test_transcribe_parses_segments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "hello world",
                "segments": [
                    {"start": 0.0, "end": 1.5, "text": "hello"},
                    {"start": 1.5, "end": 3.0, "text": "world"}
                ]
            })))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let audio = tmp.path().join("clip.wav");
        std::fs::write(&audio, b"RIFF").unwrap();

        let provider = WhisperProvider::with_base_url(store_with_key(), server.uri());
        let result = provider
            .transcribe("whisper-1", &audio, Some("ja"), None)
            .await
            .unwrap();
        assert_eq!(result.text, "hello world");
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].text, "world");
    }

    #[tokio::test]
    async fn test_unauthorized_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let audio = tmp.path().join("clip.wav");
        std::fs::write(&audio, b"RIFF").unwrap();

        let provider = WhisperProvider::with_base_url(store_with_key(), server.uri());
        let err = provider
            .transcribe("whisper-1", &audio, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LangkitError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_upload() {
        let provider = WhisperProvider::new(Arc::new(CredentialStore::new()));
        let err = provider
            .transcribe("whisper-1", Path::new("/nope.wav"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LangkitError::ProviderUnavailable { .. }));
    }
}
