//! Configuration management for the langkit core.
//!
//! Settings are loaded from `<config dir>/langkit/config.toml` layered with
//! `LANGKIT_*` environment variables, mirrored back to disk as TOML on save.
//! Saving settings repopulates the process-wide [`CredentialStore`] and must
//! be followed by `ProviderRegistry::update_factory()` so the next provider
//! lookup re-evaluates availability.

mod credentials;
mod service;

pub use credentials::CredentialStore;
pub use service::{ConfigService, ProductionConfigService, TestConfigService};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// RPC server settings.
    pub server: ServerSettings,
    /// Container runtime settings.
    pub docker: DockerSettings,
    /// Voice-separation defaults.
    pub separation: SeparationSettings,
    /// Speech-to-text defaults.
    pub stt: SttSettings,
    /// Provider API keys; copied into the credential store on save.
    pub api_keys: ApiKeySettings,
}

/// RPC server settings. The server only ever binds to loopback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// TCP port on 127.0.0.1.
    pub port: u16,
    /// Whether the event throttler starts enabled.
    pub event_throttling: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8636,
            event_throttling: true,
        }
    }
}

/// Container runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DockerSettings {
    /// Prefer the GPU container when the runtime supports it.
    pub prefer_gpu: bool,
    /// Minutes a container may sit idle before the watcher stops it.
    pub idle_timeout_minutes: u64,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            prefer_gpu: true,
            idle_timeout_minutes: 30,
        }
    }
}

/// Voice-separation defaults, overridable per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeparationSettings {
    /// Default separation model.
    pub model: String,
    /// Longest slice of audio handed to the separator in one exec, minutes.
    pub max_segment_minutes: u32,
    /// Upper bound on concurrently-processed segments; 0 means sequential.
    pub max_workers: usize,
}

impl Default for SeparationSettings {
    fn default() -> Self {
        Self {
            model: "htdemucs".to_string(),
            max_segment_minutes: 20,
            max_workers: 0,
        }
    }
}

/// Speech-to-text defaults, overridable per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttSettings {
    /// Default transcription model.
    pub model: String,
    /// Per-attempt network timeout in seconds.
    pub timeout_seconds: u32,
    /// Attempt ceiling for the retry policy.
    pub max_try: usize,
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            timeout_seconds: 60,
            max_try: 3,
        }
    }
}

/// Provider API keys as persisted in settings.
///
/// The key names are the canonical credential-store keys; empty strings mean
/// "not configured".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiKeySettings {
    pub replicate: String,
    pub elevenlabs: String,
    pub openai: String,
    pub openrouter: String,
    pub google: String,
    pub assemblyai: String,
}

impl ApiKeySettings {
    /// Iterate (store key, value) pairs in canonical order.
    pub fn entries(&self) -> [(&'static str, &str); 6] {
        [
            ("replicate", self.replicate.as_str()),
            ("elevenlabs", self.elevenlabs.as_str()),
            ("openai", self.openai.as_str()),
            ("openrouter", self.openrouter.as_str()),
            ("google", self.google.as_str()),
            ("assemblyai", self.assemblyai.as_str()),
        ]
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            docker: DockerSettings::default(),
            separation: SeparationSettings::default(),
            stt: SttSettings::default(),
            api_keys: ApiKeySettings::default(),
        }
    }
}

/// The platform config root for langkit (`<XDG config dir>/langkit`).
pub fn default_config_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("langkit")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.server.port, 8636);
        assert_eq!(s.separation.model, "htdemucs");
        assert_eq!(s.separation.max_segment_minutes, 20);
        assert_eq!(s.stt.timeout_seconds, 60);
        assert!(s.api_keys.openai.is_empty());
    }

    #[test]
    fn test_settings_toml_roundtrip() {
        let mut s = Settings::default();
        s.api_keys.openai = "sk-test".into();
        s.separation.max_segment_minutes = 10;
        let text = toml::to_string_pretty(&s).unwrap();
        let back: Settings = toml::from_str(&text).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn test_api_key_entries_order() {
        let keys = ApiKeySettings::default();
        let names: Vec<&str> = keys.entries().iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "replicate",
                "elevenlabs",
                "openai",
                "openrouter",
                "google",
                "assemblyai"
            ]
        );
    }
}
