//! Processing request wire model and typed per-feature options.
//!
//! The wire keeps a generic `options` map per feature for back-compat; the
//! boundary validates it into typed records with explicit type checks, and
//! the rest of the pipeline never touches untyped values.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Settings;
use crate::error::LangkitError;
use crate::media::AudioFormat;
use crate::translit::TranslitStyle;
use crate::Result;

static LANGUAGE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z]{2,3}(-[A-Za-z0-9]{2,8})*$").expect("valid language tag regex")
});

/// One processing request as received over the RPC surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingRequest {
    /// Media file, or a directory in bulk mode.
    pub path: String,
    /// Process a whole directory instead of one file.
    pub bulk: bool,
    /// Language being studied (BCP-47-ish tag).
    pub target_language: String,
    /// Languages the user already knows.
    pub native_languages: Vec<String>,
    /// 0-based audio track to use.
    pub audio_track_index: Option<usize>,
    /// Feature flags.
    pub selective_transliteration: bool,
    pub subtitle_romanization: bool,
    pub voice_enhancing: bool,
    pub condensed_audio: bool,
    pub dubtitles: bool,
    pub subs2cards: bool,
    /// Generic per-feature option bag, validated at the boundary.
    /// Keys: `enhance`, `translit`, `condense`, `stt`, `cards`.
    pub options: HashMap<String, HashMap<String, Value>>,
}

impl ProcessingRequest {
    /// Validate the language tags before anything else runs.
    pub fn prepare_langs(&self) -> Result<()> {
        if self.target_language.is_empty() {
            return Err(LangkitError::validation("targetLanguage is required"));
        }
        if !LANGUAGE_TAG.is_match(&self.target_language) {
            return Err(LangkitError::validation(format!(
                "targetLanguage '{}' is not a valid language tag",
                self.target_language
            )));
        }
        for tag in &self.native_languages {
            if !LANGUAGE_TAG.is_match(tag) {
                return Err(LangkitError::validation(format!(
                    "nativeLanguage '{}' is not a valid language tag",
                    tag
                )));
            }
        }
        Ok(())
    }

    fn bag(&self, feature: &str) -> HashMap<String, Value> {
        self.options.get(feature).cloned().unwrap_or_default()
    }
}

/// Typed options for the voice-enhancing feature.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhanceOptions {
    /// Separation model name.
    pub model: String,
    /// Separation provider (`demucs` or `audiosep`).
    pub provider: String,
    /// Random shifts for the separator.
    pub shifts: u32,
    /// Prediction window overlap.
    pub overlap: f32,
    /// Longest slice per exec, minutes.
    pub max_segment_minutes: u32,
    /// Final output container.
    pub output_format: AudioFormat,
    /// Gain applied to the vocals when merging, dB.
    pub voice_gain_db: f32,
    /// Mix the boosted vocals back over the original track.
    pub merge_with_original: bool,
}

/// Typed options for transliteration.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslitOptions {
    /// Romanization style.
    pub style: TranslitStyle,
}

/// Typed options for condensed audio.
#[derive(Debug, Clone, PartialEq)]
pub struct CondenseOptions {
    /// Padding added around each spoken span, ms.
    pub padding_ms: u64,
    /// Final output container.
    pub output_format: AudioFormat,
}

/// Typed options for transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct SttOptions {
    /// Transcription model name.
    pub model: String,
    /// Optional provider prompt.
    pub initial_prompt: Option<String>,
    /// Per-attempt timeout, seconds.
    pub timeout_seconds: u32,
    /// Attempt ceiling.
    pub max_try: usize,
}

/// Typed options for card building.
#[derive(Debug, Clone, PartialEq)]
pub struct CardsOptions {
    /// Padding added around each snippet, ms.
    pub padding_ms: u64,
}

/// The request as a sum over its selected features.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOptions {
    Enhance(EnhanceOptions),
    Translit(TranslitOptions),
    Condense(CondenseOptions),
    Stt(SttOptions),
    Cards(CardsOptions),
}

// ---- option bag validation helpers -------------------------------------

fn reject_unknown_keys(feature: &str, bag: &HashMap<String, Value>, known: &[&str]) -> Result<()> {
    for key in bag.keys() {
        if !known.contains(&key.as_str()) {
            return Err(LangkitError::validation(format!(
                "unknown option '{}' for feature '{}'",
                key, feature
            )));
        }
    }
    Ok(())
}

fn take_string(bag: &HashMap<String, Value>, key: &str) -> Result<Option<String>> {
    match bag.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(LangkitError::validation(format!(
            "option '{}' must be a string, got {}",
            key, other
        ))),
    }
}

fn take_u64(bag: &HashMap<String, Value>, key: &str) -> Result<Option<u64>> {
    match bag.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) if n.as_u64().is_some() => Ok(n.as_u64()),
        Some(other) => Err(LangkitError::validation(format!(
            "option '{}' must be a non-negative integer, got {}",
            key, other
        ))),
    }
}

fn take_f64(bag: &HashMap<String, Value>, key: &str) -> Result<Option<f64>> {
    match bag.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(LangkitError::validation(format!(
            "option '{}' must be a number, got {}",
            key, other
        ))),
    }
}

fn take_bool(bag: &HashMap<String, Value>, key: &str) -> Result<Option<bool>> {
    match bag.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(LangkitError::validation(format!(
            "option '{}' must be a boolean, got {}",
            key, other
        ))),
    }
}

fn take_format(bag: &HashMap<String, Value>, key: &str) -> Result<Option<AudioFormat>> {
    match take_string(bag, key)? {
        None => Ok(None),
        Some(name) => AudioFormat::parse(&name)
            .map(Some)
            .ok_or_else(|| {
                LangkitError::validation(format!(
                    "option '{}' must be one of wav|mp3|flac|opus, got '{}'",
                    key, name
                ))
            }),
    }
}

impl EnhanceOptions {
    /// Validate from the generic bag, falling back to settings defaults.
    pub fn from_request(request: &ProcessingRequest, settings: &Settings) -> Result<Self> {
        let bag = request.bag("enhance");
        reject_unknown_keys(
            "enhance",
            &bag,
            &[
                "model",
                "provider",
                "shifts",
                "overlap",
                "maxSegmentMinutes",
                "outputFormat",
                "voiceGainDb",
                "mergeWithOriginal",
            ],
        )?;
        Ok(Self {
            model: take_string(&bag, "model")?.unwrap_or_else(|| settings.separation.model.clone()),
            provider: take_string(&bag, "provider")?.unwrap_or_else(|| "demucs".to_string()),
            shifts: take_u64(&bag, "shifts")?.unwrap_or(1) as u32,
            overlap: take_f64(&bag, "overlap")?.unwrap_or(0.25) as f32,
            max_segment_minutes: take_u64(&bag, "maxSegmentMinutes")?
                .unwrap_or(u64::from(settings.separation.max_segment_minutes))
                as u32,
            output_format: take_format(&bag, "outputFormat")?.unwrap_or_default(),
            voice_gain_db: take_f64(&bag, "voiceGainDb")?.unwrap_or(9.0) as f32,
            merge_with_original: take_bool(&bag, "mergeWithOriginal")?.unwrap_or(true),
        })
    }
}

impl TranslitOptions {
    /// Validate from the request; the style follows the selected flag unless
    /// overridden in the bag.
    pub fn from_request(request: &ProcessingRequest) -> Result<Self> {
        let bag = request.bag("translit");
        reject_unknown_keys("translit", &bag, &["style"])?;
        let default_style = if request.selective_transliteration {
            TranslitStyle::Selective
        } else {
            TranslitStyle::Hepburn
        };
        let style = match take_string(&bag, "style")?.as_deref() {
            None => default_style,
            Some("hepburn") => TranslitStyle::Hepburn,
            Some("selective") => TranslitStyle::Selective,
            Some(other) => {
                return Err(LangkitError::validation(format!(
                    "option 'style' must be hepburn|selective, got '{}'",
                    other
                )));
            }
        };
        Ok(Self { style })
    }
}

impl CondenseOptions {
    /// Validate from the generic bag.
    pub fn from_request(request: &ProcessingRequest) -> Result<Self> {
        let bag = request.bag("condense");
        reject_unknown_keys("condense", &bag, &["paddingMs", "outputFormat"])?;
        Ok(Self {
            padding_ms: take_u64(&bag, "paddingMs")?.unwrap_or(250),
            output_format: take_format(&bag, "outputFormat")?.unwrap_or(AudioFormat::Mp3),
        })
    }
}

impl SttOptions {
    /// Validate from the generic bag, falling back to settings defaults.
    pub fn from_request(request: &ProcessingRequest, settings: &Settings) -> Result<Self> {
        let bag = request.bag("stt");
        reject_unknown_keys("stt", &bag, &["model", "initialPrompt", "timeoutSeconds", "maxTry"])?;
        Ok(Self {
            model: take_string(&bag, "model")?.unwrap_or_else(|| settings.stt.model.clone()),
            initial_prompt: take_string(&bag, "initialPrompt")?,
            timeout_seconds: take_u64(&bag, "timeoutSeconds")?
                .unwrap_or(u64::from(settings.stt.timeout_seconds)) as u32,
            max_try: take_u64(&bag, "maxTry")?.unwrap_or(settings.stt.max_try as u64) as usize,
        })
    }
}

impl CardsOptions {
    /// Validate from the generic bag.
    pub fn from_request(request: &ProcessingRequest) -> Result<Self> {
        let bag = request.bag("cards");
        reject_unknown_keys("cards", &bag, &["paddingMs"])?;
        Ok(Self {
            padding_ms: take_u64(&bag, "paddingMs")?.unwrap_or(250),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_with(feature: &str, key: &str, value: Value) -> ProcessingRequest {
        let mut request = ProcessingRequest {
            target_language: "ja".into(),
            ..ProcessingRequest::default()
        };
        request
            .options
            .entry(feature.to_string())
            .or_default()
            .insert(key.to_string(), value);
        request
    }

    #[test]
    fn test_prepare_langs_accepts_tags() {
        let mut request = ProcessingRequest {
            target_language: "ja".into(),
            native_languages: vec!["en".into(), "pt-BR".into()],
            ..ProcessingRequest::default()
        };
        assert!(request.prepare_langs().is_ok());
        request.target_language = "".into();
        assert!(request.prepare_langs().is_err());
        request.target_language = "not a tag!".into();
        assert!(request.prepare_langs().is_err());
    }

    #[test]
    fn test_enhance_defaults_come_from_settings() {
        let request = ProcessingRequest {
            target_language: "ja".into(),
            ..ProcessingRequest::default()
        };
        let mut settings = Settings::default();
        settings.separation.max_segment_minutes = 12;
        let opts = EnhanceOptions::from_request(&request, &settings).unwrap();
        assert_eq!(opts.model, "htdemucs");
        assert_eq!(opts.max_segment_minutes, 12);
        assert_eq!(opts.output_format, AudioFormat::Flac);
    }

    #[test]
    fn test_wrong_type_names_the_key() {
        let request = request_with("enhance", "shifts", json!("two"));
        let err = EnhanceOptions::from_request(&request, &Settings::default()).unwrap_err();
        assert!(matches!(err, LangkitError::Validation { .. }));
        assert!(err.to_string().contains("shifts"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let request = request_with("stt", "temperature", json!(0.7));
        let err = SttOptions::from_request(&request, &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_format_option_parsing() {
        let request = request_with("condense", "outputFormat", json!("opus"));
        let opts = CondenseOptions::from_request(&request).unwrap();
        assert_eq!(opts.output_format, AudioFormat::Opus);

        let request = request_with("condense", "outputFormat", json!("ogg"));
        assert!(CondenseOptions::from_request(&request).is_err());
    }

    #[test]
    fn test_translit_style_follows_flag() {
        let mut request = ProcessingRequest {
            target_language: "ja".into(),
            selective_transliteration: true,
            ..ProcessingRequest::default()
        };
        assert_eq!(
            TranslitOptions::from_request(&request).unwrap().style,
            TranslitStyle::Selective
        );
        request.selective_transliteration = false;
        request.subtitle_romanization = true;
        assert_eq!(
            TranslitOptions::from_request(&request).unwrap().style,
            TranslitStyle::Hepburn
        );
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let request: ProcessingRequest = serde_json::from_value(json!({
            "path": "/media/demo.mp4",
            "targetLanguage": "ja",
            "voiceEnhancing": true,
            "options": {"enhance": {"maxSegmentMinutes": 10}}
        }))
        .unwrap();
        assert!(request.voice_enhancing);
        assert_eq!(request.target_language, "ja");
        let opts = EnhanceOptions::from_request(&request, &Settings::default()).unwrap();
        assert_eq!(opts.max_segment_minutes, 10);
    }
}
