//! Subtitle model and formats.
//!
//! The pipeline reads subtitles that sit next to the media item and writes
//! provider-suffixed outputs in the same directory. Everything is UTF-8
//! with LF line endings.

pub mod srt;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::LangkitError;
use crate::Result;

/// One timed subtitle line.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleEntry {
    /// 1-based sequence number.
    pub index: usize,
    /// Start of the spoken span.
    pub start: Duration,
    /// End of the spoken span.
    pub end: Duration,
    /// Text, possibly multi-line.
    pub text: String,
}

/// A parsed subtitle file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subtitle {
    /// Entries in display order.
    pub entries: Vec<SubtitleEntry>,
}

impl Subtitle {
    /// Load and parse an SRT file. CRLF input is accepted, CR is stripped.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LangkitError::PathNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let entries = srt::parse(&content.replace('\r', ""))?;
        Ok(Self { entries })
    }

    /// Serialize to SRT and write, UTF-8, LF only.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, srt::serialize(&self.entries))?;
        Ok(())
    }

    /// Total spoken time across entries.
    pub fn spoken_duration(&self) -> Duration {
        self.entries
            .iter()
            .map(|e| e.end.saturating_sub(e.start))
            .sum()
    }
}

/// Find the subtitle sitting next to a media item: `<base>.srt` first, then
/// any `<base>.*.srt` sibling.
pub fn sibling_subtitle(media: &Path) -> Option<PathBuf> {
    let stem = media.file_stem()?.to_string_lossy().to_string();
    let dir = media.parent()?;

    let exact = dir.join(format!("{}.srt", stem));
    if exact.exists() {
        return Some(exact);
    }

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().is_some_and(|ext| ext == "srt")
                && p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(&format!("{}.", stem)))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Output path for a derived subtitle: `<base>.<TAG>.srt` next to the source.
pub fn tagged_output_path(media: &Path, tag: &str) -> PathBuf {
    let stem = media
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    media.with_file_name(format!("{}.{}.srt", stem, tag))
}
