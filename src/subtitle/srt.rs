//! SubRip (.srt) parsing and serialization.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::LangkitError;
use crate::Result;

use super::SubtitleEntry;

static TIME_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}):(\d{2}):(\d{2}),(\d{3}) --> (\d{2}):(\d{2}):(\d{2}),(\d{3})")
        .expect("valid SRT time regex")
});

/// Parse SRT content into entries. Malformed blocks without a valid time
/// range are skipped; a non-numeric sequence number is an error.
pub fn parse(content: &str) -> Result<Vec<SubtitleEntry>> {
    let mut entries = Vec::new();

    for block in content.split("\n\n") {
        if block.trim().is_empty() {
            continue;
        }
        let lines: Vec<&str> = block.lines().collect();
        if lines.len() < 3 {
            continue;
        }

        let index: usize = lines[0].trim().parse().map_err(|e| {
            LangkitError::subtitle("SRT", format!("invalid sequence number: {}", e))
        })?;

        if let Some(caps) = TIME_RANGE.captures(lines[1]) {
            let start = parse_time(&caps, 1)?;
            let end = parse_time(&caps, 5)?;
            let text = lines[2..].join("\n");
            entries.push(SubtitleEntry {
                index,
                start,
                end,
                text,
            });
        }
    }

    Ok(entries)
}

/// Serialize entries as SRT, renumbering from 1. LF line endings only.
pub fn serialize(entries: &[SubtitleEntry]) -> String {
    let mut output = String::new();
    for (i, entry) in entries.iter().enumerate() {
        output.push_str(&format!("{}\n", i + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_duration(entry.start),
            format_duration(entry.end)
        ));
        output.push_str(&format!("{}\n\n", entry.text));
    }
    output
}

fn parse_time(caps: &regex::Captures, start_group: usize) -> Result<Duration> {
    let field = |offset: usize| -> Result<u64> {
        caps[start_group + offset]
            .parse()
            .map_err(|e| LangkitError::subtitle("SRT", format!("bad time value: {}", e)))
    };
    let hours = field(0)?;
    let minutes = field(1)?;
    let seconds = field(2)?;
    let millis = field(3)?;
    Ok(Duration::from_millis(
        hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + millis,
    ))
}

/// Format a duration as `HH:MM:SS,mmm`.
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1_000;
    let millis = total_ms % 1_000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}
