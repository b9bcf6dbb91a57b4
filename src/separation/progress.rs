//! Streaming parser for the separator's TTY output.
//!
//! The exec is attached with a pseudo-terminal (and `COLUMNS=200`) so the
//! tool's progress library renders percentages. A small state machine
//! tracks whether those percentages belong to the model download or to the
//! actual separation, and suppresses numeric dips so every phase reports
//! monotonically.

use once_cell::sync::Lazy;
use regex::Regex;

static PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)%").expect("valid percent regex"));

/// Coarse step within the separator's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Unknown,
    ModelDownload,
    Processing,
}

/// One parsed progress step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeparationUpdate {
    /// Phase the percent belongs to.
    pub phase: Phase,
    /// Percent in 0..=100, non-decreasing per phase.
    pub percent: u32,
}

/// State machine over raw TTY chunks.
pub struct TtyProgressParser {
    phase: Phase,
    last_download_pct: u32,
    last_processing_pct: u32,
}

impl Default for TtyProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TtyProgressParser {
    /// Fresh parser in the Unknown phase.
    pub fn new() -> Self {
        Self {
            phase: Phase::Unknown,
            last_download_pct: 0,
            last_processing_pct: 0,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Feed one output chunk; returns an update when a new, higher percent
    /// for the current phase was observed.
    pub fn feed(&mut self, chunk: &str) -> Option<SeparationUpdate> {
        let has_download_marker = chunk.contains("Downloading");
        if has_download_marker {
            self.phase = Phase::ModelDownload;
        }

        // The last percent token in the chunk wins.
        let percent = PERCENT
            .captures_iter(chunk)
            .filter_map(|caps| caps[1].parse::<u32>().ok())
            .filter(|p| *p <= 100)
            .last()?;

        // Percent tokens outside download chunks drive the separation bar,
        // whether the download phase happened or not.
        if !has_download_marker {
            self.phase = Phase::Processing;
        }

        match self.phase {
            Phase::ModelDownload => {
                if percent < self.last_download_pct {
                    return None;
                }
                self.last_download_pct = percent;
                Some(SeparationUpdate {
                    phase: Phase::ModelDownload,
                    percent,
                })
            }
            Phase::Processing | Phase::Unknown => {
                if percent < self.last_processing_pct {
                    return None;
                }
                self.last_processing_pct = percent;
                Some(SeparationUpdate {
                    phase: Phase::Processing,
                    percent,
                })
            }
        }
    }
}

/// Overall percent across segments: segment `index` (0-based) of `total`,
/// with the final segment completing the whole bar.
pub fn overall_percent(index: usize, total: usize, segment_pct: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    if index + 1 == total && segment_pct >= 100 {
        return 100;
    }
    ((index as u32 * 100 + segment_pct.min(100)) / total as u32).min(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_token_in_chunk_wins() {
        let mut parser = TtyProgressParser::new();
        let update = parser.feed("  12%|####      | ...  34%|#####     |").unwrap();
        assert_eq!(update.percent, 34);
        assert_eq!(update.phase, Phase::Processing);
    }

    #[test]
    fn test_downloading_marker_sets_phase() {
        let mut parser = TtyProgressParser::new();
        let update = parser.feed("Downloading: \"htdemucs\" 45%").unwrap();
        assert_eq!(update.phase, Phase::ModelDownload);
        assert_eq!(update.percent, 45);
    }

    #[test]
    fn test_percent_after_download_implies_processing() {
        let mut parser = TtyProgressParser::new();
        parser.feed("Downloading: weights 100%").unwrap();
        let update = parser.feed(" 5%|          |").unwrap();
        assert_eq!(update.phase, Phase::Processing);
        assert_eq!(update.percent, 5);
    }

    #[test]
    fn test_dips_suppressed_per_phase() {
        let mut parser = TtyProgressParser::new();
        parser.feed(" 50%").unwrap();
        assert!(parser.feed(" 40%").is_none());
        let update = parser.feed(" 60%").unwrap();
        assert_eq!(update.percent, 60);
    }

    #[test]
    fn test_out_of_range_tokens_ignored() {
        let mut parser = TtyProgressParser::new();
        assert!(parser.feed("loading 400% faster").is_none());
        assert_eq!(parser.feed("10%").unwrap().percent, 10);
    }

    #[test]
    fn test_chunks_without_percent_ignored() {
        let mut parser = TtyProgressParser::new();
        assert!(parser.feed("Selected model is a bag of 1 models").is_none());
    }

    #[test]
    fn test_overall_percent_across_segments() {
        assert_eq!(overall_percent(0, 4, 0), 0);
        assert_eq!(overall_percent(0, 4, 100), 25);
        assert_eq!(overall_percent(2, 4, 50), 62);
        // The last segment at 100 forces overall 100.
        assert_eq!(overall_percent(3, 4, 100), 100);
        assert_eq!(overall_percent(0, 1, 100), 100);
    }
}
