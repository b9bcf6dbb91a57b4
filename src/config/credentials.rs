//! Process-wide credential store owned by the provider registry.
//!
//! A thin concurrent map from credential name to secret value. Values are
//! written whenever settings are saved and read by providers when the
//! registry rebuilds its handles.

use dashmap::DashMap;

use super::ApiKeySettings;

/// Concurrent credential map keyed by provider credential name.
///
/// Keys are the canonical names `replicate`, `elevenlabs`, `openai`,
/// `openrouter`, `google`, `assemblyai`.
#[derive(Default, Debug)]
pub struct CredentialStore {
    values: DashMap<String, String>,
}

impl CredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a credential. An empty value removes the entry.
    pub fn set(&self, name: &str, value: &str) {
        if value.is_empty() {
            self.values.remove(name);
        } else {
            self.values.insert(name.to_string(), value.to_string());
        }
    }

    /// Look up a credential.
    pub fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).map(|v| v.clone())
    }

    /// Whether a non-empty credential exists under this name.
    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Replace the whole store with the keys persisted in settings.
    pub fn refresh_from(&self, keys: &ApiKeySettings) {
        for (name, value) in keys.entries() {
            self.set(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = CredentialStore::new();
        store.set("openai", "sk-1");
        assert_eq!(store.get("openai").as_deref(), Some("sk-1"));
        assert!(store.has("openai"));

        store.set("openai", "");
        assert!(store.get("openai").is_none());
        assert!(!store.has("openai"));
    }

    #[test]
    fn test_refresh_from_settings() {
        let store = CredentialStore::new();
        store.set("elevenlabs", "old");
        let keys = ApiKeySettings {
            openai: "sk-2".into(),
            ..ApiKeySettings::default()
        };
        store.refresh_from(&keys);
        assert_eq!(store.get("openai").as_deref(), Some("sk-2"));
        // elevenlabs was empty in settings, so the stale value is cleared
        assert!(store.get("elevenlabs").is_none());
    }
}
