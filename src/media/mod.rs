//! Thin wrappers around the external media tools.
//!
//! ffmpeg and ffprobe do the heavy lifting for probing, track extraction,
//! segmenting, concatenation and final encoding. All intermediates are WAV
//! so nothing is re-encoded until the single final encode.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::LangkitError;
use crate::Result;

/// Output container for separated or condensed audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Flac,
    Opus,
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::Flac
    }
}

impl AudioFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Opus => "opus",
        }
    }

    /// ffmpeg codec argument for this container.
    fn codec(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "pcm_s16le",
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Flac => "flac",
            AudioFormat::Opus => "libopus",
        }
    }

    /// Parse a user-supplied format name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "wav" => Some(AudioFormat::Wav),
            "mp3" => Some(AudioFormat::Mp3),
            "flac" => Some(AudioFormat::Flac),
            "opus" => Some(AudioFormat::Opus),
            _ => None,
        }
    }
}

/// Handle to the external media tools.
#[derive(Debug, Clone)]
pub struct MediaToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for MediaToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaToolkit {
    /// Resolve tools from `PATH`.
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }

    /// Use explicit binaries (downloaded tools, test doubles).
    pub fn with_binaries(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self { ffmpeg, ffprobe }
    }

    /// Duration of a media file.
    pub async fn probe_duration(&self, path: &Path) -> Result<Duration> {
        let stdout = self
            .run(
                &self.ffprobe,
                &[
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                    &path.to_string_lossy(),
                ],
            )
            .await?;
        let seconds: f64 = stdout
            .trim()
            .parse()
            .map_err(|e| LangkitError::media(format!("unparseable duration from ffprobe: {}", e)))?;
        Ok(Duration::from_secs_f64(seconds.max(0.0)))
    }

    /// Extract one audio track to 16-bit stereo WAV.
    pub async fn extract_audio(
        &self,
        video: &Path,
        track_index: Option<usize>,
        out_wav: &Path,
    ) -> Result<()> {
        let map = format!("0:a:{}", track_index.unwrap_or(0));
        self.run(
            &self.ffmpeg,
            &[
                "-y",
                "-i",
                &video.to_string_lossy(),
                "-map",
                &map,
                "-vn",
                "-acodec",
                "pcm_s16le",
                "-ac",
                "2",
                "-ar",
                "44100",
                &out_wav.to_string_lossy(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Split a WAV into fixed-length segments, returning them in order.
    pub async fn split_wav(
        &self,
        input: &Path,
        segment_seconds: u64,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)?;
        let pattern = out_dir.join("segment-%03d.wav");
        self.run(
            &self.ffmpeg,
            &[
                "-y",
                "-i",
                &input.to_string_lossy(),
                "-f",
                "segment",
                "-segment_time",
                &segment_seconds.to_string(),
                "-c",
                "copy",
                &pattern.to_string_lossy(),
            ],
        )
        .await?;

        let mut segments: Vec<PathBuf> = std::fs::read_dir(out_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with("segment-"))
            })
            .collect();
        segments.sort();
        if segments.is_empty() {
            return Err(LangkitError::media("segmenting produced no output files"));
        }
        Ok(segments)
    }

    /// Cut one span out of an audio file into WAV.
    pub async fn extract_span(
        &self,
        input: &Path,
        start: Duration,
        end: Duration,
        out_wav: &Path,
    ) -> Result<()> {
        self.run(
            &self.ffmpeg,
            &[
                "-y",
                "-ss",
                &format!("{:.3}", start.as_secs_f64()),
                "-to",
                &format!("{:.3}", end.as_secs_f64()),
                "-i",
                &input.to_string_lossy(),
                "-acodec",
                "pcm_s16le",
                &out_wav.to_string_lossy(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Concatenate WAV parts losslessly via the concat demuxer.
    pub async fn concat_wav(&self, parts: &[PathBuf], out: &Path) -> Result<()> {
        if parts.is_empty() {
            return Err(LangkitError::media("nothing to concatenate"));
        }
        let list_path = out.with_extension("concat.txt");
        let mut list = String::new();
        for part in parts {
            // concat demuxer single-quote escaping
            let escaped = part.to_string_lossy().replace('\'', "'\\''");
            list.push_str(&format!("file '{}'\n", escaped));
        }
        std::fs::write(&list_path, list)?;

        let result = self
            .run(
                &self.ffmpeg,
                &[
                    "-y",
                    "-f",
                    "concat",
                    "-safe",
                    "0",
                    "-i",
                    &list_path.to_string_lossy(),
                    "-c",
                    "copy",
                    &out.to_string_lossy(),
                ],
            )
            .await;
        let _ = std::fs::remove_file(&list_path);
        result.map(|_| ())
    }

    /// Encode an audio file into the requested final format.
    pub async fn encode(&self, input: &Path, out: &Path, format: AudioFormat) -> Result<()> {
        self.run(
            &self.ffmpeg,
            &[
                "-y",
                "-i",
                &input.to_string_lossy(),
                "-acodec",
                format.codec(),
                &out.to_string_lossy(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Mix boosted vocals over the original track (voice enhancing merge).
    pub async fn merge_vocals(
        &self,
        original: &Path,
        vocals: &Path,
        out: &Path,
        voice_gain_db: f32,
    ) -> Result<()> {
        let filter = format!(
            "[1:a]volume={}dB[v];[0:a][v]amix=inputs=2:duration=first:normalize=0[out]",
            voice_gain_db
        );
        self.run(
            &self.ffmpeg,
            &[
                "-y",
                "-i",
                &original.to_string_lossy(),
                "-i",
                &vocals.to_string_lossy(),
                "-filter_complex",
                &filter,
                "-map",
                "[out]",
                &out.to_string_lossy(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn run(&self, program: &Path, args: &[&str]) -> Result<String> {
        debug!("running {} {}", program.display(), args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                LangkitError::media(format!("failed to launch {}: {}", program.display(), e))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(LangkitError::media(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                tail
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_parse() {
        assert_eq!(AudioFormat::parse("FLAC"), Some(AudioFormat::Flac));
        assert_eq!(AudioFormat::parse("opus"), Some(AudioFormat::Opus));
        assert_eq!(AudioFormat::parse("ogg"), None);
    }

    #[test]
    fn test_default_format_is_flac() {
        assert_eq!(AudioFormat::default(), AudioFormat::Flac);
        assert_eq!(AudioFormat::default().extension(), "flac");
    }

    #[test]
    fn test_missing_binary_is_media_error() {
        let toolkit = MediaToolkit::with_binaries(
            PathBuf::from("/nonexistent/ffmpeg"),
            PathBuf::from("/nonexistent/ffprobe"),
        );
        let err = tokio_test::block_on(toolkit.probe_duration(Path::new("/tmp/whatever.wav")))
            .unwrap_err();
        assert!(matches!(err, LangkitError::Media { .. }));
    }
}
