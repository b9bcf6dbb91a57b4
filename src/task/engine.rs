//! Single-instance task engine.
//!
//! At most one task is active process-wide. A cancel that arrives while
//! nothing runs is held for a bounded window and defeats the next start, so
//! client/server race ordering cannot launch a task the user just cancelled.
//! The pipeline runs in a detached scope whose cancellation is wired only to
//! `cancel_processing`, never to the RPC request that started it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::ConfigService;
use crate::error::LangkitError;
use crate::event::{
    EventThrottler, CHANNEL_PROCESSING_COMPLETED, CHANNEL_PROCESSING_STARTED,
};
use crate::media::MediaToolkit;
use crate::progress::importance::{BAR_ITEM, BAR_MEDIA};
use crate::progress::{compute_importance_map, ProgressReporter};
use crate::providers::ProviderRegistry;
use crate::separation::SeparationOptions;
use crate::stt::SttEngine;
use crate::Result;

use super::request::{EnhanceOptions, FeatureOptions, ProcessingRequest};
use super::routing::{build_plan, TaskPlan};
use super::TaskContext;

/// How long a pending cancel defeats the next start.
const PENDING_CANCEL_WINDOW: Duration = Duration::from_secs(2);

/// Media extensions considered processable in bulk mode.
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "webm", "ts", "mp3", "wav", "flac", "opus", "m4a",
];

/// Wire shape of the processing status.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    /// Whether a task is active right now.
    pub is_processing: bool,
    /// Present when the call was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingStatus {
    fn idle() -> Self {
        Self {
            is_processing: false,
            error: None,
        }
    }

    fn processing() -> Self {
        Self {
            is_processing: true,
            error: None,
        }
    }
}

/// Process-global processing state; every field lives under one mutex.
struct ProcessingState {
    active: bool,
    pending_cancel: bool,
    pending_cancel_at: Option<Instant>,
    cancel: Option<CancellationToken>,
}

/// Everything the pipeline needs, passed explicitly instead of through
/// module globals.
pub struct EngineDeps {
    /// Settings source.
    pub config: Arc<dyn ConfigService>,
    /// Event egress.
    pub throttler: Arc<EventThrottler>,
    /// Provider resolution.
    pub registry: Arc<ProviderRegistry>,
    /// External media tools.
    pub media: Arc<MediaToolkit>,
    /// Transcription engine.
    pub stt: Arc<SttEngine>,
}

/// The single-instance processing engine.
#[derive(Clone)]
pub struct TaskEngine {
    deps: Arc<EngineDeps>,
    state: Arc<Mutex<ProcessingState>>,
}

impl TaskEngine {
    /// Create an idle engine.
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self {
            deps,
            state: Arc::new(Mutex::new(ProcessingState {
                active: false,
                pending_cancel: false,
                pending_cancel_at: None,
                cancel: None,
            })),
        }
    }

    /// Start processing, unless a task is active or a fresh pending cancel
    /// consumes the request. Must be called from within a tokio runtime.
    pub fn send_processing_request(&self, request: ProcessingRequest) -> ProcessingStatus {
        let token = {
            let mut state = self.state.lock().unwrap();
            if state.active {
                return ProcessingStatus {
                    is_processing: true,
                    error: Some("Processing already in progress".to_string()),
                };
            }
            if state.pending_cancel {
                let fresh = state
                    .pending_cancel_at
                    .is_some_and(|at| at.elapsed() <= PENDING_CANCEL_WINDOW);
                state.pending_cancel = false;
                state.pending_cancel_at = None;
                if fresh {
                    info!("start aborted by pending cancel");
                    return ProcessingStatus::idle();
                }
            }
            state.active = true;
            let token = CancellationToken::new();
            state.cancel = Some(token.clone());
            token
        };

        // Observable before any per-item event of this task.
        self.deps.throttler.add_event(
            CHANNEL_PROCESSING_STARTED,
            json!({ "path": request.path, "bulk": request.bulk }),
        );

        let deps = self.deps.clone();
        let state = self.state.clone();
        // Detached scope: the RPC request's lifetime must not cancel the
        // pipeline, only cancel_processing may.
        tokio::spawn(async move {
            let pipeline_deps = deps.clone();
            let pipeline_token = token.clone();
            let inner =
                tokio::spawn(
                    async move { run_pipeline(pipeline_deps, request, pipeline_token).await },
                );

            let completion = match inner.await {
                Ok(Ok(())) => json!({ "status": "success" }),
                Ok(Err(e)) => {
                    if e.is_cancelled() {
                        info!("processing cancelled");
                    } else {
                        error!("processing failed: {}", e);
                    }
                    json!({ "status": "error", "error": e.to_string() })
                }
                Err(join_err) if join_err.is_panic() => {
                    error!("processing panicked");
                    json!({ "status": "error", "error": "internal error: task panicked" })
                }
                Err(_) => json!({ "status": "error", "error": "context canceled" }),
            };

            {
                let mut state = state.lock().unwrap();
                state.active = false;
                state.cancel = None;
            }
            deps.throttler
                .add_event(CHANNEL_PROCESSING_COMPLETED, completion);
        });

        ProcessingStatus::processing()
    }

    /// Cancel the active task, or record a pending cancel for the window.
    pub fn cancel_processing(&self) {
        let mut state = self.state.lock().unwrap();
        if state.active {
            if let Some(token) = &state.cancel {
                info!("cancelling active processing");
                token.cancel();
            }
        } else {
            // A stale pending cancel is replaced, not extended.
            state.pending_cancel = true;
            state.pending_cancel_at = Some(Instant::now());
            info!("no active processing; pending cancel recorded");
        }
    }

    /// Current status.
    pub fn get_processing_status(&self) -> ProcessingStatus {
        let state = self.state.lock().unwrap();
        ProcessingStatus {
            is_processing: state.active,
            error: None,
        }
    }
}

async fn run_pipeline(
    deps: Arc<EngineDeps>,
    request: ProcessingRequest,
    token: CancellationToken,
) -> Result<()> {
    let settings = deps.config.get_settings()?;
    let plan = build_plan(&request, &settings)?;
    let importance = compute_importance_map(plan.mode, request.bulk, &plan.feature_set);
    let reporter = ProgressReporter::new(deps.throttler.clone(), importance);
    let ctx = TaskContext::new(token, reporter);

    let items = discover_items(&request)?;
    let total = items.len();
    info!(
        "processing {} item(s) in {} mode",
        total,
        plan.mode.name()
    );

    for (index, item) in items.iter().enumerate() {
        ctx.check_cancelled()?;
        if request.bulk {
            ctx.reporter.update(
                BAR_MEDIA,
                (index * 100 / total.max(1)) as u32,
                100,
                "media",
                &format!("Processing {}/{}", index + 1, total),
            );
        }
        ctx.reporter.update(
            BAR_ITEM,
            0,
            100,
            "item",
            &item
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        );

        process_item(&deps, &ctx, &plan, &request, item).await?;

        ctx.reporter.update(BAR_ITEM, 100, 100, "item", "Done");
    }
    if request.bulk {
        ctx.reporter
            .update(BAR_MEDIA, 100, 100, "media", "All items processed");
    }
    Ok(())
}

/// Resolve the request path into the ordered work list.
fn discover_items(request: &ProcessingRequest) -> Result<Vec<PathBuf>> {
    let root = PathBuf::from(&request.path);
    if !root.exists() {
        return Err(LangkitError::PathNotFound(root));
    }
    if !request.bulk {
        return Ok(vec![root]);
    }
    let mut items: Vec<PathBuf> = WalkDir::new(&root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
        })
        .collect();
    items.sort();
    if items.is_empty() {
        return Err(LangkitError::validation(format!(
            "no media files found under {}",
            request.path
        )));
    }
    Ok(items)
}

async fn process_item(
    deps: &Arc<EngineDeps>,
    ctx: &TaskContext,
    plan: &TaskPlan,
    request: &ProcessingRequest,
    item: &Path,
) -> Result<()> {
    let work_dir = std::env::temp_dir().join(format!("langkit-task-{}", Uuid::new_v4().simple()));
    tokio::fs::create_dir_all(&work_dir).await?;
    let result = process_item_inner(deps, ctx, plan, request, item, &work_dir).await;
    if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
        warn!("failed to remove item work dir: {}", e);
    }
    result
}

async fn process_item_inner(
    deps: &Arc<EngineDeps>,
    ctx: &TaskContext,
    plan: &TaskPlan,
    request: &ProcessingRequest,
    item: &Path,
    work_dir: &Path,
) -> Result<()> {
    // Several features need the item's audio track; extract at most once.
    let mut extracted_audio: Option<PathBuf> = None;

    for feature in &plan.features {
        ctx.check_cancelled()?;
        match feature {
            FeatureOptions::Enhance(opts) => {
                let audio = ensure_audio(
                    &deps.media,
                    item,
                    request.audio_track_index,
                    work_dir,
                    &mut extracted_audio,
                )
                .await?;
                run_enhance(deps, ctx, item, &audio, opts).await?;
            }
            FeatureOptions::Translit(opts) => {
                crate::translit::romanize_sibling_subtitle(ctx, item, opts)?;
            }
            FeatureOptions::Condense(opts) => {
                crate::condense::condense_audio(
                    ctx,
                    &deps.media,
                    item,
                    request.audio_track_index,
                    opts,
                )
                .await?;
            }
            FeatureOptions::Stt(opts) => {
                let audio = ensure_audio(
                    &deps.media,
                    item,
                    request.audio_track_index,
                    work_dir,
                    &mut extracted_audio,
                )
                .await?;
                deps.stt
                    .transcribe_to_subtitle(ctx, item, &audio, &request.target_language, opts)
                    .await?;
            }
            FeatureOptions::Cards(opts) => {
                crate::cards::build_deck(ctx, &deps.media, item, request.audio_track_index, opts)
                    .await?;
            }
        }
    }
    Ok(())
}

/// Extract the item's audio track once, caching the resulting WAV path.
async fn ensure_audio(
    media: &MediaToolkit,
    item: &Path,
    track: Option<usize>,
    work_dir: &Path,
    cache: &mut Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(path) = cache {
        return Ok(path.clone());
    }
    let out = work_dir.join("audio.wav");
    media.extract_audio(item, track, &out).await?;
    *cache = Some(out.clone());
    Ok(out)
}

async fn run_enhance(
    deps: &Arc<EngineDeps>,
    ctx: &TaskContext,
    item: &Path,
    audio: &Path,
    opts: &EnhanceOptions,
) -> Result<()> {
    let provider = deps.registry.get_separation(&opts.provider)?;
    if !provider.is_available() {
        return Err(LangkitError::provider_unavailable(
            opts.provider.clone(),
            "separation back-end is not runnable on this host",
        ));
    }
    let separation_opts = SeparationOptions {
        model: opts.model.clone(),
        stems: "vocals".to_string(),
        shifts: opts.shifts,
        overlap: opts.overlap,
        max_segment_minutes: opts.max_segment_minutes,
        output_format: opts.output_format,
    };
    let vocals = provider.separate(ctx, audio, &separation_opts).await?;

    let stem = item
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let vocals_path = item.with_file_name(format!(
        "{}.{}.{}",
        stem,
        opts.model.to_uppercase(),
        opts.output_format.extension()
    ));
    tokio::fs::write(&vocals_path, &vocals).await?;
    info!("wrote {}", vocals_path.display());

    if opts.merge_with_original {
        let merged_path = item.with_file_name(format!(
            "{}.ENHANCED.{}",
            stem,
            opts.output_format.extension()
        ));
        deps.media
            .merge_vocals(audio, &vocals_path, &merged_path, opts.voice_gain_db)
            .await?;
        info!("wrote {}", merged_path.display());
    }
    Ok(())
}
