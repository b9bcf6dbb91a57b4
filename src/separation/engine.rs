//! The separation engine: split, dispatch, parse, concatenate.
//!
//! Long audio is sliced into bounded segments so GPU memory stays flat, each
//! segment runs through the containerized separator, and the vocal tracks
//! are concatenated and encoded exactly once at the end. All intermediates
//! are WAV.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use uuid::Uuid;

use crate::docker::{ComputeMode, ContainerHandle, ContainerOptions, ContainerRuntime};
use crate::error::LangkitError;
use crate::media::{AudioFormat, MediaToolkit};
use crate::models::{model_spec, ModelCache, ModelSpec};
use crate::progress::importance::{BAR_DEMUCS_MODEL_DL, BAR_DEMUCS_PROCESS};
use crate::retry::{DownloadExpectation, RetryPolicy};
use crate::task::TaskContext;
use crate::Result;

use super::progress::{overall_percent, Phase, TtyProgressParser};

/// Options for one separation run.
#[derive(Debug, Clone)]
pub struct SeparationOptions {
    /// Separation model name (must exist in the model catalog).
    pub model: String,
    /// Stem to keep; the engine always asks for a two-stem split.
    pub stems: String,
    /// Number of random shifts (quality/time trade-off).
    pub shifts: u32,
    /// Overlap between prediction windows.
    pub overlap: f32,
    /// Longest slice of audio per exec, in minutes.
    pub max_segment_minutes: u32,
    /// Final output container.
    pub output_format: AudioFormat,
}

impl Default for SeparationOptions {
    fn default() -> Self {
        Self {
            model: "htdemucs".to_string(),
            stems: "vocals".to_string(),
            shifts: 1,
            overlap: 0.25,
            max_segment_minutes: 20,
            output_format: AudioFormat::Flac,
        }
    }
}

/// Engine front-end over the container runtime and the model cache.
pub struct SeparationEngine {
    runtime: Arc<ContainerRuntime>,
    cache: Arc<ModelCache>,
    media: Arc<MediaToolkit>,
    retry: RetryPolicy,
    compute_mode: ComputeMode,
}

impl SeparationEngine {
    /// Create an engine for one tool family / compute mode.
    pub fn new(
        runtime: Arc<ContainerRuntime>,
        cache: Arc<ModelCache>,
        media: Arc<MediaToolkit>,
        compute_mode: ComputeMode,
    ) -> Self {
        Self {
            runtime,
            cache,
            media,
            retry: RetryPolicy::default(),
            compute_mode,
        }
    }

    /// The compute mode this engine dispatches to.
    pub fn compute_mode(&self) -> ComputeMode {
        self.compute_mode
    }

    /// Separate the vocals of `audio` and return them encoded in the
    /// requested format. The per-run work directory is removed on success
    /// and on failure.
    pub async fn separate_vocals(
        &self,
        ctx: &TaskContext,
        audio: &Path,
        opts: &SeparationOptions,
    ) -> Result<Vec<u8>> {
        ctx.check_cancelled()?;
        if !audio.exists() {
            return Err(LangkitError::PathNotFound(audio.to_path_buf()));
        }
        let spec = model_spec(&opts.model).ok_or_else(|| {
            LangkitError::validation(format!("unknown separation model '{}'", opts.model))
        })?;

        self.ensure_model(ctx, spec).await?;

        // The run dir lives inside the exchange mount so the container sees
        // every intermediate without copies.
        let run_id = Uuid::new_v4().simple().to_string();
        let run_dir = self.runtime.exchange_dir().join("runs").join(&run_id);
        tokio::fs::create_dir_all(&run_dir).await?;

        let result = self.run_separation(ctx, audio, opts, spec, &run_dir, &run_id).await;
        let _ = tokio::fs::remove_dir_all(&run_dir).await;
        result
    }

    /// Make sure the model weights are on disk, retrying with partial-file
    /// cleanup between attempts.
    async fn ensure_model(&self, ctx: &TaskContext, spec: &'static ModelSpec) -> Result<()> {
        if self.cache.is_ready(spec) {
            debug!("model {} already cached", spec.name);
            return Ok(());
        }
        let expectation = DownloadExpectation {
            model_dir: self.cache.model_dir(spec.tool),
            model_files: spec.files.iter().map(|f| f.name.to_string()).collect(),
            progress_bar_ids: vec![BAR_DEMUCS_MODEL_DL.to_string()],
            reporter: ctx.reporter.clone(),
        };
        self.retry
            .run_with_hook(
                || self.cache.pre_download_model(spec, &ctx.reporter, &ctx.cancel),
                |attempt, err| {
                    if matches!(err, LangkitError::ModelDownloadFailed { .. }) {
                        info!("cleaning partial model files before attempt {}", attempt + 1);
                        expectation.cleanup();
                    }
                },
            )
            .await
    }

    async fn run_separation(
        &self,
        ctx: &TaskContext,
        audio: &Path,
        opts: &SeparationOptions,
        spec: &ModelSpec,
        run_dir: &Path,
        run_id: &str,
    ) -> Result<Vec<u8>> {
        let duration = self.media.probe_duration(audio).await?;
        let segment_seconds = u64::from(opts.max_segment_minutes.max(1)) * 60;

        let segments: Vec<PathBuf> = if duration.as_secs() <= segment_seconds {
            // Single-segment path: hand the source to the separator as-is.
            let input = run_dir.join(format!(
                "input.{}",
                audio
                    .extension()
                    .map(|e| e.to_string_lossy().to_string())
                    .unwrap_or_else(|| "wav".to_string())
            ));
            tokio::fs::copy(audio, &input).await?;
            vec![input]
        } else {
            let whole_wav = run_dir.join("input.wav");
            self.media.encode(audio, &whole_wav, AudioFormat::Wav).await?;
            let parts = self
                .media
                .split_wav(&whole_wav, segment_seconds, &run_dir.join("segments"))
                .await?;
            let _ = tokio::fs::remove_file(&whole_wav).await;
            parts
        };

        let container = self
            .runtime
            .get(self.compute_mode, ContainerOptions::default(), &ctx.reporter)
            .await?;

        let total = segments.len();
        let mut vocal_parts = Vec::with_capacity(total);
        for (index, segment) in segments.iter().enumerate() {
            ctx.check_cancelled()?;
            let vocals = self
                .separate_segment(ctx, &container, segment, opts, spec, run_id, index, total)
                .await?;
            vocal_parts.push(vocals);
        }

        let combined = if vocal_parts.len() == 1 {
            vocal_parts.pop().unwrap()
        } else {
            let out = run_dir.join("vocals.wav");
            self.media.concat_wav(&vocal_parts, &out).await?;
            out
        };

        // Never re-encode when the native WAV output is what was asked for.
        if total == 1 && opts.output_format == AudioFormat::Wav {
            return Ok(tokio::fs::read(&combined).await?);
        }
        let final_path = run_dir.join(format!("vocals.{}", opts.output_format.extension()));
        self.media
            .encode(&combined, &final_path, opts.output_format)
            .await?;
        Ok(tokio::fs::read(&final_path).await?)
    }

    #[allow(clippy::too_many_arguments)]
    async fn separate_segment(
        &self,
        ctx: &TaskContext,
        container: &ContainerHandle,
        segment: &Path,
        opts: &SeparationOptions,
        spec: &ModelSpec,
        run_id: &str,
        index: usize,
        total: usize,
    ) -> Result<PathBuf> {
        let description = format!("Processing segment {}/{}", index + 1, total);
        let container_input = self.container_path(segment)?;
        let container_out = format!("{}/runs/{}/out", self.runtime.container_exchange_dir(), run_id);
        let shifts = opts.shifts.to_string();
        let overlap = opts.overlap.to_string();
        let two_stems = format!("--two-stems={}", opts.stems);
        let cmd: Vec<&str> = vec![
            "python3",
            "-m",
            "demucs.separate",
            &two_stems,
            "-n",
            spec.name,
            "--shifts",
            &shifts,
            "--overlap",
            &overlap,
            "-o",
            &container_out,
            &container_input,
        ];

        let operation = || async {
            let mut parser = TtyProgressParser::new();
            let reporter = ctx.reporter.clone();
            let desc = description.clone();
            let mut on_chunk = |chunk: &str| {
                if let Some(update) = parser.feed(chunk) {
                    match update.phase {
                        Phase::ModelDownload => reporter.update(
                            BAR_DEMUCS_MODEL_DL,
                            update.percent,
                            100,
                            "model-download",
                            "Downloading model inside container",
                        ),
                        _ => reporter.update(
                            BAR_DEMUCS_PROCESS,
                            overall_percent(index, total, update.percent),
                            100,
                            "separate",
                            &desc,
                        ),
                    }
                }
            };
            let output = self
                .runtime
                .exec(
                    container,
                    &cmd,
                    &[("COLUMNS", "200")],
                    true,
                    &ctx.cancel,
                    &mut on_chunk,
                )
                .await?;

            if output.combined.contains("CUDA out of memory") {
                return Err(LangkitError::CudaOutOfMemory);
            }
            if output.exit_code != 0 {
                let tail: String = output
                    .combined
                    .lines()
                    .rev()
                    .take(5)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect::<Vec<_>>()
                    .join("\n");
                return Err(LangkitError::transient(format!(
                    "demucs execution failed (exit {}): {}",
                    output.exit_code, tail
                )));
            }
            Ok(())
        };
        self.retry.run(operation).await?;

        // demucs writes <out>/<model>/<input stem>/<stem>.wav
        let stem = segment
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let out_root = self
            .runtime
            .exchange_dir()
            .join("runs")
            .join(run_id)
            .join("out");
        let produced = out_root
            .join(spec.name)
            .join(&stem)
            .join(format!("{}.wav", opts.stems));
        if !produced.exists() {
            let listing = list_dir_recursive(&out_root);
            return Err(LangkitError::container(format!(
                "separator reported success but produced no '{}' for segment {}; workdir contents: [{}]",
                produced.display(),
                index + 1,
                listing.join(", ")
            )));
        }

        let collected = out_root
            .parent()
            .unwrap_or(&out_root)
            .join(format!("vocals-{:03}.wav", index));
        tokio::fs::rename(&produced, &collected).await?;
        Ok(collected)
    }

    /// Translate a host path under the exchange dir into the container view.
    fn container_path(&self, host: &Path) -> Result<String> {
        let exchange = self.runtime.exchange_dir();
        let relative = host.strip_prefix(&exchange).map_err(|_| {
            LangkitError::container(format!(
                "path {} is outside the exchange dir",
                host.display()
            ))
        })?;
        Ok(format!(
            "{}/{}",
            self.runtime.container_exchange_dir(),
            relative.to_string_lossy().replace('\\', "/")
        ))
    }
}

/// A separation engine exposed through the provider registry.
pub struct ContainerSeparationProvider {
    name: &'static str,
    engine: SeparationEngine,
    docker_available: once_cell::sync::OnceCell<bool>,
}

impl ContainerSeparationProvider {
    /// Wrap an engine under a provider name (`demucs`, `audiosep`).
    pub fn new(name: &'static str, engine: SeparationEngine) -> Self {
        Self {
            name,
            engine,
            docker_available: once_cell::sync::OnceCell::new(),
        }
    }
}

#[async_trait::async_trait]
impl crate::providers::SeparationProvider for ContainerSeparationProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_available(&self) -> bool {
        *self.docker_available.get_or_init(|| {
            std::process::Command::new("docker")
                .arg("version")
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        })
    }

    async fn separate(
        &self,
        ctx: &TaskContext,
        audio: &Path,
        opts: &SeparationOptions,
    ) -> Result<Vec<u8>> {
        self.engine.separate_vocals(ctx, audio, opts).await
    }
}

fn list_dir_recursive(root: &Path) -> Vec<String> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap_or(e.path())
                .to_string_lossy()
                .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = SeparationOptions::default();
        assert_eq!(opts.model, "htdemucs");
        assert_eq!(opts.stems, "vocals");
        assert_eq!(opts.max_segment_minutes, 20);
        assert_eq!(opts.output_format, AudioFormat::Flac);
    }
}
