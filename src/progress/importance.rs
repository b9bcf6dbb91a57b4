//! Ordinal importance assignment for concurrent progress bars.
//!
//! A task can light up half a dozen bars at once (media-level, per-item,
//! separation compute, image pull, model download). The importance map ranks
//! them so the frontend can size and colour them consistently. The mapping
//! is a pure function of the pipeline mode, bulk flag and feature set; the
//! ground truth lives in `docs/progress-importance.md` and the test suite
//! asserts every row of it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::task::{FeatureSet, Mode};

/// Ordinal importance of one progress bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportanceLevel {
    VeryImportant,
    Important,
    Normal,
    LowImportance,
    VeryLowImportance,
    /// The bar belongs to a feature that is not part of this task.
    NotApplicable,
}

impl ImportanceLevel {
    /// Stable CSS-ish height tag for the frontend.
    ///
    /// `NotApplicable` renders at Normal's height.
    pub fn height_class(&self) -> &'static str {
        match self {
            ImportanceLevel::VeryImportant => "h-5",
            ImportanceLevel::Important => "h-4",
            ImportanceLevel::Normal => "h-3",
            ImportanceLevel::LowImportance => "h-2",
            ImportanceLevel::VeryLowImportance => "h-1",
            ImportanceLevel::NotApplicable => "h-3",
        }
    }

    /// One level less important, saturating at the bottom.
    pub fn step_down(self) -> Self {
        match self {
            ImportanceLevel::VeryImportant => ImportanceLevel::Important,
            ImportanceLevel::Important => ImportanceLevel::Normal,
            ImportanceLevel::Normal => ImportanceLevel::LowImportance,
            ImportanceLevel::LowImportance => ImportanceLevel::VeryLowImportance,
            ImportanceLevel::VeryLowImportance => ImportanceLevel::VeryLowImportance,
            ImportanceLevel::NotApplicable => ImportanceLevel::NotApplicable,
        }
    }

    /// Parse the level name used in the ground-truth table.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "VeryImportant" => Some(ImportanceLevel::VeryImportant),
            "Important" => Some(ImportanceLevel::Important),
            "Normal" => Some(ImportanceLevel::Normal),
            "LowImportance" => Some(ImportanceLevel::LowImportance),
            "VeryLowImportance" => Some(ImportanceLevel::VeryLowImportance),
            "NotApplicable" => Some(ImportanceLevel::NotApplicable),
            _ => None,
        }
    }
}

/// Media-level bar shown for a whole directory in bulk mode.
pub const BAR_MEDIA: &str = "media-bar";
/// Per-item bar.
pub const BAR_ITEM: &str = "item-bar";
/// Separation compute bar.
pub const BAR_DEMUCS_PROCESS: &str = "demucs-process";
/// Separation image pull bar.
pub const BAR_DEMUCS_PULL: &str = "demucs-pull";
/// Separation model download bar.
pub const BAR_DEMUCS_MODEL_DL: &str = "demucs-model-dl";
/// Romanization compute bar.
pub const BAR_TRANSLIT_PROCESS: &str = "translit-process";
/// Condensed-audio compute bar.
pub const BAR_CONDENSE_PROCESS: &str = "condense-process";
/// Transcription compute bar.
pub const BAR_STT_PROCESS: &str = "stt-process";

/// Ordinal levels for every known bar, with longest-prefix fallback.
#[derive(Debug, Clone)]
pub struct ImportanceMap {
    levels: HashMap<String, ImportanceLevel>,
}

impl ImportanceMap {
    /// Resolve the level of a bar id.
    ///
    /// Exact match first, then the longest key that prefixes the id, then
    /// `Normal`.
    pub fn level_for(&self, bar_id: &str) -> ImportanceLevel {
        if let Some(level) = self.levels.get(bar_id) {
            return *level;
        }
        self.levels
            .iter()
            .filter(|(key, _)| bar_id.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, level)| *level)
            .unwrap_or(ImportanceLevel::Normal)
    }

    /// All explicit entries, for diagnostics and the table test.
    pub fn entries(&self) -> &HashMap<String, ImportanceLevel> {
        &self.levels
    }
}

/// Which feature a mode treats as its centrepiece.
fn dominant_feature(mode: Mode) -> Feature {
    match mode {
        Mode::Enhance => Feature::Enhance,
        Mode::Translit => Feature::Translit,
        Mode::Condense => Feature::Condense,
        Mode::Subs2Dubs | Mode::Subs2Cards => Feature::Stt,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feature {
    Enhance,
    Translit,
    Condense,
    Stt,
}

/// Compute the importance map for a task.
///
/// Rules:
/// - in bulk mode the media bar is `VeryImportant` and every per-item bar
///   steps down one level;
/// - the mode's dominant feature sits one level under the item bar, other
///   selected features one under that;
/// - within the separation feature, the image-pull bar is one level under
///   the compute bar and the model-download bar one under the pull bar;
/// - bars of unselected features are `NotApplicable`.
pub fn compute_importance_map(mode: Mode, is_bulk: bool, features: &FeatureSet) -> ImportanceMap {
    let mut levels = HashMap::new();

    let item_level = if is_bulk {
        levels.insert(BAR_MEDIA.to_string(), ImportanceLevel::VeryImportant);
        ImportanceLevel::Important
    } else {
        levels.insert(BAR_MEDIA.to_string(), ImportanceLevel::NotApplicable);
        ImportanceLevel::VeryImportant
    };
    levels.insert(BAR_ITEM.to_string(), item_level);

    let dominant = dominant_feature(mode);
    let compute_level = |feature: Feature| {
        if feature == dominant {
            item_level.step_down()
        } else {
            item_level.step_down().step_down()
        }
    };

    if features.enhance {
        let compute = compute_level(Feature::Enhance);
        levels.insert(BAR_DEMUCS_PROCESS.to_string(), compute);
        levels.insert(BAR_DEMUCS_PULL.to_string(), compute.step_down());
        levels.insert(
            BAR_DEMUCS_MODEL_DL.to_string(),
            compute.step_down().step_down(),
        );
    } else {
        levels.insert(BAR_DEMUCS_PROCESS.to_string(), ImportanceLevel::NotApplicable);
        levels.insert(BAR_DEMUCS_PULL.to_string(), ImportanceLevel::NotApplicable);
        levels.insert(BAR_DEMUCS_MODEL_DL.to_string(), ImportanceLevel::NotApplicable);
    }

    let simple = [
        (Feature::Translit, features.translit, BAR_TRANSLIT_PROCESS),
        (Feature::Condense, features.condense, BAR_CONDENSE_PROCESS),
        (Feature::Stt, features.stt, BAR_STT_PROCESS),
    ];
    for (feature, selected, bar) in simple {
        let level = if selected {
            compute_level(feature)
        } else {
            ImportanceLevel::NotApplicable
        };
        levels.insert(bar.to_string(), level);
    }

    ImportanceMap { levels }
}
