//! Provider registry and model catalog.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::config::CredentialStore;
use crate::error::LangkitError;
use crate::Result;

use super::{ElevenLabsProvider, ModelInfo, SeparationProvider, SttProvider, WhisperProvider};

/// Static description of a known STT model.
struct SttModelEntry {
    name: &'static str,
    display_name: &'static str,
    description: &'static str,
    provider: &'static str,
    is_recommended: bool,
    is_deprecated: bool,
    takes_initial_prompt: bool,
}

const STT_MODELS: &[SttModelEntry] = &[
    SttModelEntry {
        name: "whisper-1",
        display_name: "Whisper v2",
        description: "OpenAI's general-purpose speech recognition model",
        provider: "openai",
        is_recommended: false,
        is_deprecated: false,
        takes_initial_prompt: true,
    },
    SttModelEntry {
        name: "gpt-4o-transcribe",
        display_name: "GPT-4o Transcribe",
        description: "OpenAI's current transcription model, strongest on noisy dialogue",
        provider: "openai",
        is_recommended: true,
        is_deprecated: false,
        takes_initial_prompt: true,
    },
    SttModelEntry {
        name: "scribe_v1",
        display_name: "ElevenLabs Scribe",
        description: "ElevenLabs speech-to-text with word-level timestamps",
        provider: "elevenlabs",
        is_recommended: false,
        is_deprecated: false,
        takes_initial_prompt: false,
    },
];

/// Registry resolving STT and separation providers by name.
///
/// STT handles are rebuilt lazily after [`ProviderRegistry::update_factory`];
/// separation providers are registered once at bootstrap and probed live.
pub struct ProviderRegistry {
    credentials: Arc<CredentialStore>,
    stt_cache: Mutex<Option<HashMap<&'static str, Arc<dyn SttProvider>>>>,
    separation: Mutex<Vec<Arc<dyn SeparationProvider>>>,
}

impl ProviderRegistry {
    /// Create a registry over the given credential store.
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self {
            credentials,
            stt_cache: Mutex::new(None),
            separation: Mutex::new(Vec::new()),
        }
    }

    /// The credential store owned by this registry.
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Register a separation back-end (done once at bootstrap).
    pub fn register_separation(&self, provider: Arc<dyn SeparationProvider>) {
        self.separation.lock().unwrap().push(provider);
    }

    /// Discard cached provider handles; the next lookup re-evaluates
    /// availability against the refreshed credential store.
    pub fn update_factory(&self) {
        debug!("provider registry factory updated");
        *self.stt_cache.lock().unwrap() = None;
    }

    fn stt_providers(&self) -> HashMap<&'static str, Arc<dyn SttProvider>> {
        let mut cache = self.stt_cache.lock().unwrap();
        if cache.is_none() {
            let mut providers: HashMap<&'static str, Arc<dyn SttProvider>> = HashMap::new();
            providers.insert(
                "openai",
                Arc::new(WhisperProvider::new(self.credentials.clone())),
            );
            providers.insert(
                "elevenlabs",
                Arc::new(ElevenLabsProvider::new(self.credentials.clone())),
            );
            *cache = Some(providers);
        }
        cache.as_ref().unwrap().clone()
    }

    /// Resolve an STT provider by provider name.
    pub fn get_stt(&self, name: &str) -> Result<Arc<dyn SttProvider>> {
        self.stt_providers()
            .get(name)
            .cloned()
            .ok_or_else(|| LangkitError::provider_unavailable(name, "unknown STT provider"))
    }

    /// Resolve the provider serving a given STT model name.
    ///
    /// Unknown models are validation errors; known models whose provider has
    /// no credential are unavailable.
    pub fn get_stt_for_model(&self, model: &str) -> Result<Arc<dyn SttProvider>> {
        let entry = STT_MODELS
            .iter()
            .find(|entry| entry.name == model)
            .ok_or_else(|| {
                LangkitError::validation(format!("unknown transcription model '{}'", model))
            })?;
        let provider = self.get_stt(entry.provider)?;
        if !provider.is_available() {
            return Err(LangkitError::provider_unavailable(
                entry.provider,
                format!("no credential configured for model '{}'", model),
            ));
        }
        Ok(provider)
    }

    /// Resolve a separation provider by name.
    pub fn get_separation(&self, name: &str) -> Result<Arc<dyn SeparationProvider>> {
        self.separation
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| LangkitError::provider_unavailable(name, "unknown separation provider"))
    }

    /// Every known model with live availability.
    pub fn model_catalog(&self) -> Vec<ModelInfo> {
        let stt = self.stt_providers();
        let mut catalog: Vec<ModelInfo> = STT_MODELS
            .iter()
            .map(|entry| ModelInfo {
                name: entry.name.to_string(),
                display_name: entry.display_name.to_string(),
                description: entry.description.to_string(),
                provider_name: entry.provider.to_string(),
                is_recommended: entry.is_recommended,
                is_deprecated: entry.is_deprecated,
                takes_initial_prompt: entry.takes_initial_prompt,
                is_available: stt.get(entry.provider).is_some_and(|p| p.is_available()),
            })
            .collect();

        for provider in self.separation.lock().unwrap().iter() {
            let available = provider.is_available();
            for spec in crate::models::MODEL_SPECS {
                if crate::docker::bar_prefix(spec.tool) == provider.name() {
                    catalog.push(ModelInfo {
                        name: spec.name.to_string(),
                        display_name: spec.name.to_string(),
                        description: "Voice separation model".to_string(),
                        provider_name: provider.name().to_string(),
                        is_recommended: spec.name == "htdemucs",
                        is_deprecated: false,
                        takes_initial_prompt: false,
                        is_available: available,
                    });
                }
            }
        }
        catalog
    }
}
