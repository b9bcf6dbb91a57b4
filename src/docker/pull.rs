//! Parsing of `docker pull` output into monotonic progress.
//!
//! Docker reports per-layer progress interleaved and out of order; layers
//! appear, finish and vanish. Percent is therefore computed against a fixed
//! declared image size, and the phase description only ever moves forward
//! through Downloading, Extracting, Finalizing.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

static LAYER_PROGRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<id>[0-9a-f]{6,}): (?P<phase>Downloading|Extracting)\s+\[[^\]]*\]\s+(?P<cur>[0-9.]+)\s*(?P<unit>kB|MB|GB)",
    )
    .expect("valid docker pull progress regex")
})
;

/// Coarse pull phase, strictly forward-moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PullPhase {
    Downloading,
    Extracting,
    Finalizing,
}

impl PullPhase {
    /// User-facing description for the pull bar.
    pub fn description(&self) -> &'static str {
        match self {
            PullPhase::Downloading => "Downloading…",
            PullPhase::Extracting => "Extracting…",
            PullPhase::Finalizing => "Finalizing…",
        }
    }
}

/// One update produced by the parser.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PullUpdate {
    /// Current phase.
    pub phase: PullPhase,
    /// Percent in 0..=100 against the declared image size.
    pub percent: u32,
}

/// Stream parser over `docker pull` output lines.
pub struct PullProgressParser {
    declared_size: u64,
    phase: PullPhase,
    /// Latest downloaded bytes per layer id.
    layer_bytes: HashMap<String, u64>,
    last_percent: u32,
}

impl PullProgressParser {
    /// Create a parser for an image of the given declared size.
    pub fn new(declared_size_bytes: u64) -> Self {
        Self {
            declared_size: declared_size_bytes.max(1),
            phase: PullPhase::Downloading,
            layer_bytes: HashMap::new(),
            last_percent: 0,
        }
    }

    /// Feed one output line; returns an update when progress moved.
    pub fn feed_line(&mut self, line: &str) -> Option<PullUpdate> {
        if line.contains("Status: Downloaded") || line.contains("Status: Image is up to date") {
            self.phase = PullPhase::Finalizing;
            self.last_percent = 100;
            return Some(PullUpdate {
                phase: self.phase,
                percent: 100,
            });
        }

        if let Some(caps) = LAYER_PROGRESS.captures(line) {
            let phase = match &caps["phase"] {
                "Extracting" => PullPhase::Extracting,
                _ => PullPhase::Downloading,
            };
            if phase > self.phase {
                self.phase = phase;
            }
            let value: f64 = caps["cur"].parse().unwrap_or(0.0);
            let bytes = match &caps["unit"] {
                "kB" => value * 1_000.0,
                "MB" => value * 1_000_000.0,
                "GB" => value * 1_000_000_000.0,
                _ => value,
            } as u64;
            self.layer_bytes.insert(caps["id"].to_string(), bytes);

            let total: u64 = self.layer_bytes.values().sum();
            // Cap below 100 until the daemon confirms completion.
            let percent =
                (((total as f64 / self.declared_size as f64) * 100.0) as u32).min(99);
            if percent > self.last_percent {
                self.last_percent = percent;
            }
            return Some(PullUpdate {
                phase: self.phase,
                percent: self.last_percent,
            });
        }
        None
    }
}
