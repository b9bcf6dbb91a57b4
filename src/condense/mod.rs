//! Condensed-audio composition.
//!
//! Cuts the audio down to the spoken spans of the sibling subtitle (padded,
//! overlaps merged) and concatenates them into one condensed track.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use uuid::Uuid;

use crate::error::LangkitError;
use crate::media::MediaToolkit;
use crate::progress::importance::BAR_CONDENSE_PROCESS;
use crate::subtitle::{sibling_subtitle, Subtitle};
use crate::task::{CondenseOptions, TaskContext};
use crate::Result;

/// Produce `<base>.CONDENSED.<ext>` next to the media item.
pub async fn condense_audio(
    ctx: &TaskContext,
    media: &MediaToolkit,
    media_path: &Path,
    audio_track: Option<usize>,
    opts: &CondenseOptions,
) -> Result<PathBuf> {
    ctx.check_cancelled()?;
    let subtitle_path = sibling_subtitle(media_path).ok_or_else(|| {
        LangkitError::validation(format!(
            "no subtitle found next to {} to condense against",
            media_path.display()
        ))
    })?;
    let subtitle = Subtitle::load(&subtitle_path)?;
    if subtitle.entries.is_empty() {
        return Err(LangkitError::validation("subtitle has no timed entries"));
    }

    let work_dir = std::env::temp_dir().join(format!("langkit-condense-{}", Uuid::new_v4().simple()));
    tokio::fs::create_dir_all(&work_dir).await?;
    let result = run(ctx, media, media_path, audio_track, opts, &subtitle, &work_dir).await;
    let _ = tokio::fs::remove_dir_all(&work_dir).await;
    result
}

async fn run(
    ctx: &TaskContext,
    media: &MediaToolkit,
    media_path: &Path,
    audio_track: Option<usize>,
    opts: &CondenseOptions,
    subtitle: &Subtitle,
    work_dir: &Path,
) -> Result<PathBuf> {
    let source_wav = work_dir.join("source.wav");
    media
        .extract_audio(media_path, audio_track, &source_wav)
        .await?;

    let padding = Duration::from_millis(opts.padding_ms);
    let spans = merge_spans(
        subtitle
            .entries
            .iter()
            .map(|e| (e.start.saturating_sub(padding), e.end + padding))
            .collect(),
    );

    let total = spans.len();
    let mut parts = Vec::with_capacity(total);
    for (i, (start, end)) in spans.into_iter().enumerate() {
        ctx.check_cancelled()?;
        let part = work_dir.join(format!("span-{:04}.wav", i));
        media.extract_span(&source_wav, start, end, &part).await?;
        parts.push(part);
        ctx.reporter.update(
            BAR_CONDENSE_PROCESS,
            ((i + 1) * 90 / total.max(1)) as u32,
            100,
            "condense",
            "Cutting spoken spans",
        );
    }

    let combined = work_dir.join("condensed.wav");
    media.concat_wav(&parts, &combined).await?;

    let stem = media_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let out_path = media_path.with_file_name(format!(
        "{}.CONDENSED.{}",
        stem,
        opts.output_format.extension()
    ));
    media.encode(&combined, &out_path, opts.output_format).await?;
    ctx.reporter.update(
        BAR_CONDENSE_PROCESS,
        100,
        100,
        "condense",
        "Condensed audio ready",
    );
    info!("wrote {}", out_path.display());
    Ok(out_path)
}

/// Merge overlapping or touching spans, preserving order.
pub fn merge_spans(mut spans: Vec<(Duration, Duration)>) -> Vec<(Duration, Duration)> {
    spans.sort_by_key(|(start, _)| *start);
    let mut merged: Vec<(Duration, Duration)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start_ms: u64, end_ms: u64) -> (Duration, Duration) {
        (Duration::from_millis(start_ms), Duration::from_millis(end_ms))
    }

    #[test]
    fn test_merge_overlapping_spans() {
        let merged = merge_spans(vec![span(0, 1000), span(800, 2000), span(3000, 4000)]);
        assert_eq!(merged, vec![span(0, 2000), span(3000, 4000)]);
    }

    #[test]
    fn test_merge_touching_spans() {
        let merged = merge_spans(vec![span(0, 1000), span(1000, 1500)]);
        assert_eq!(merged, vec![span(0, 1500)]);
    }

    #[test]
    fn test_merge_unsorted_input() {
        let merged = merge_spans(vec![span(5000, 6000), span(0, 1000)]);
        assert_eq!(merged, vec![span(0, 1000), span(5000, 6000)]);
    }

    #[test]
    fn test_contained_span_absorbed() {
        let merged = merge_spans(vec![span(0, 5000), span(1000, 2000)]);
        assert_eq!(merged, vec![span(0, 5000)]);
    }
}
