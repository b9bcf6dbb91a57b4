//! Flash-card media composition (subs2cards).
//!
//! Cuts one audio snippet per subtitle entry and writes a TSV deck whose
//! rows reference the snippets, ready for import into an SRS tool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use uuid::Uuid;

use crate::error::LangkitError;
use crate::media::{AudioFormat, MediaToolkit};
use crate::subtitle::{sibling_subtitle, srt, Subtitle};
use crate::task::{CardsOptions, TaskContext};
use crate::Result;

/// Bar id for deck building; resolved through the importance map's
/// longest-prefix fallback.
const BAR_CARDS: &str = "cards-deck";

/// Build `<base>.tsv` plus a `<base>.media/` snippet directory next to the
/// media item. Returns the deck path.
pub async fn build_deck(
    ctx: &TaskContext,
    media: &MediaToolkit,
    media_path: &Path,
    audio_track: Option<usize>,
    opts: &CardsOptions,
) -> Result<PathBuf> {
    ctx.check_cancelled()?;
    let subtitle_path = sibling_subtitle(media_path).ok_or_else(|| {
        LangkitError::validation(format!(
            "no subtitle found next to {} to build cards from",
            media_path.display()
        ))
    })?;
    let subtitle = Subtitle::load(&subtitle_path)?;
    if subtitle.entries.is_empty() {
        return Err(LangkitError::validation("subtitle has no timed entries"));
    }

    let work_dir = std::env::temp_dir().join(format!("langkit-cards-{}", Uuid::new_v4().simple()));
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
    opts: &CardsOptions,
    subtitle: &Subtitle,
    work_dir: &Path,
) -> Result<PathBuf> {
    let source_wav = work_dir.join("source.wav");
    media
        .extract_audio(media_path, audio_track, &source_wav)
        .await?;

    let stem = media_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "deck".to_string());
    let media_dir = media_path.with_file_name(format!("{}.media", stem));
    tokio::fs::create_dir_all(&media_dir).await?;

    let padding = Duration::from_millis(opts.padding_ms);
    let total = subtitle.entries.len();
    let mut rows = String::new();
    for (i, entry) in subtitle.entries.iter().enumerate() {
        ctx.check_cancelled()?;
        let snippet_wav = work_dir.join(format!("snippet-{:04}.wav", i));
        media
            .extract_span(
                &source_wav,
                entry.start.saturating_sub(padding),
                entry.end + padding,
                &snippet_wav,
            )
            .await?;

        let snippet_name = format!("{}_{:04}.{}", stem, i + 1, AudioFormat::Mp3.extension());
        media
            .encode(&snippet_wav, &media_dir.join(&snippet_name), AudioFormat::Mp3)
            .await?;

        rows.push_str(&format!(
            "{}\t{}\t{}\t{}\t[sound:{}]\n",
            i + 1,
            srt::format_duration(entry.start),
            srt::format_duration(entry.end),
            entry.text.replace(['\t', '\n'], " "),
            snippet_name
        ));
        ctx.reporter.update(
            BAR_CARDS,
            ((i + 1) * 100 / total) as u32,
            100,
            "cards",
            "Building card deck",
        );
    }

    let deck_path = media_path.with_file_name(format!("{}.tsv", stem));
    tokio::fs::write(&deck_path, rows).await?;
    info!("wrote {}", deck_path.display());
    Ok(deck_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_id_resolves_via_fallback() {
        use crate::progress::{compute_importance_map, ImportanceLevel};
        use crate::task::{FeatureSet, Mode};
        let map = compute_importance_map(
            Mode::Subs2Cards,
            false,
            &FeatureSet {
                stt: true,
                ..FeatureSet::default()
            },
        );
        // No explicit entry: the deck bar falls back to Normal.
        assert_eq!(map.level_for(BAR_CARDS), ImportanceLevel::Normal);
    }
}
