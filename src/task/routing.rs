//! Feature routing: from boolean flags to a mode and a typed work plan.

use crate::config::Settings;
use crate::error::LangkitError;
use crate::Result;

use super::request::{
    CardsOptions, CondenseOptions, EnhanceOptions, FeatureOptions, ProcessingRequest, SttOptions,
    TranslitOptions,
};
use super::{FeatureSet, Mode};

/// The validated, typed shape of one task.
#[derive(Debug, Clone)]
pub struct TaskPlan {
    /// Terminal pipeline kind.
    pub mode: Mode,
    /// Which engines will run.
    pub feature_set: FeatureSet,
    /// Typed options for each selected feature, in execution order.
    pub features: Vec<FeatureOptions>,
}

/// Choose the mode from the request's feature flags, most specific first:
/// selective transliteration, subtitle romanization, voice enhancing,
/// condensed audio, dubtitles, subs2cards.
pub fn route_mode(request: &ProcessingRequest) -> Result<Mode> {
    if request.selective_transliteration || request.subtitle_romanization {
        Ok(Mode::Translit)
    } else if request.voice_enhancing {
        Ok(Mode::Enhance)
    } else if request.condensed_audio {
        Ok(Mode::Condense)
    } else if request.dubtitles {
        Ok(Mode::Subs2Dubs)
    } else if request.subs2cards {
        Ok(Mode::Subs2Cards)
    } else {
        Err(LangkitError::validation(
            "no feature selected: enable at least one of selectiveTransliteration, subtitleRomanization, voiceEnhancing, condensedAudio, dubtitles, subs2cards",
        ))
    }
}

/// The engines a request exercises, regardless of routing priority.
///
/// Card building separates the voice track first so snippets are clean;
/// transcription only runs when dubtitles are requested.
pub fn feature_set(request: &ProcessingRequest) -> FeatureSet {
    FeatureSet {
        enhance: request.voice_enhancing || request.subs2cards,
        translit: request.selective_transliteration || request.subtitle_romanization,
        condense: request.condensed_audio,
        stt: request.dubtitles,
    }
}

/// Validate the whole request into a typed plan.
///
/// Malformed options abort with a validation error before anything runs.
pub fn build_plan(request: &ProcessingRequest, settings: &Settings) -> Result<TaskPlan> {
    request.prepare_langs()?;
    let mode = route_mode(request)?;
    let set = feature_set(request);

    let mut features = Vec::new();
    if set.enhance {
        features.push(FeatureOptions::Enhance(EnhanceOptions::from_request(
            request, settings,
        )?));
    }
    if set.translit {
        features.push(FeatureOptions::Translit(TranslitOptions::from_request(
            request,
        )?));
    }
    if set.condense {
        features.push(FeatureOptions::Condense(CondenseOptions::from_request(
            request,
        )?));
    }
    if set.stt {
        features.push(FeatureOptions::Stt(SttOptions::from_request(
            request, settings,
        )?));
    }
    if request.subs2cards {
        features.push(FeatureOptions::Cards(CardsOptions::from_request(request)?));
    }

    Ok(TaskPlan {
        mode,
        feature_set: set,
        features,
    })
}
