//! Shared on-disk model store and pre-downloader.
//!
//! Model weights live under `<configRoot>/<tool>-models/`, one directory per
//! tool family, shared by every task. Presence of a file under its vendor
//! checksum name means "ready"; downloads go through a temp file and an
//! atomic rename so a crash never leaves a half-written weight that looks
//! complete.

pub mod downloader;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::LangkitError;
use crate::progress::{humanize_bytes, importance::BAR_DEMUCS_MODEL_DL, ProgressReporter};
use crate::Result;

/// Tool family owning a model directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolFamily {
    Demucs,
    AudioSeparator,
}

impl ToolFamily {
    /// Directory name under the config root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ToolFamily::Demucs => "demucs-models",
            ToolFamily::AudioSeparator => "audio-separator-models",
        }
    }

    /// Legacy per-container model path relative to the config root, used by
    /// the one-time migration.
    pub fn legacy_dir_name(&self) -> &'static str {
        match self {
            ToolFamily::Demucs => "docker/demucs/data/models",
            ToolFamily::AudioSeparator => "docker/audio-separator/data/models",
        }
    }

    /// Mount point of the shared model dir inside the tool container.
    pub fn container_model_dir(&self) -> &'static str {
        match self {
            ToolFamily::Demucs => "/data/models",
            ToolFamily::AudioSeparator => "/app/models",
        }
    }
}

/// One expected weight file.
#[derive(Debug, Clone, Copy)]
pub struct ModelFile {
    /// Vendor checksum-scheme file name.
    pub name: &'static str,
    /// HTTPS source.
    pub url: &'static str,
}

/// A known separation model and the files that make it ready.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    /// Model name as selected in the request options.
    pub name: &'static str,
    /// Owning tool family.
    pub tool: ToolFamily,
    /// Expected files, all required.
    pub files: &'static [ModelFile],
}

/// Every model the separation subsystem knows how to fetch.
pub const MODEL_SPECS: &[ModelSpec] = &[
    ModelSpec {
        name: "htdemucs",
        tool: ToolFamily::Demucs,
        files: &[
            ModelFile {
                name: "955717e8-8726e21a.th",
                url: "https://dl.fbaipublicfiles.com/demucs/hybrid_transformer/955717e8-8726e21a.th",
            },
            ModelFile {
                name: "htdemucs.yaml",
                url: "https://raw.githubusercontent.com/facebookresearch/demucs/main/demucs/remote/htdemucs.yaml",
            },
        ],
    },
    ModelSpec {
        name: "htdemucs_ft",
        tool: ToolFamily::Demucs,
        files: &[
            ModelFile {
                name: "f7e0c4bc-ba3fe64a.th",
                url: "https://dl.fbaipublicfiles.com/demucs/hybrid_transformer/f7e0c4bc-ba3fe64a.th",
            },
            ModelFile {
                name: "d12395a8-e57c48e6.th",
                url: "https://dl.fbaipublicfiles.com/demucs/hybrid_transformer/d12395a8-e57c48e6.th",
            },
            ModelFile {
                name: "92cfc3b6-ef3bcb9c.th",
                url: "https://dl.fbaipublicfiles.com/demucs/hybrid_transformer/92cfc3b6-ef3bcb9c.th",
            },
            ModelFile {
                name: "04573f0d-f3cf25b2.th",
                url: "https://dl.fbaipublicfiles.com/demucs/hybrid_transformer/04573f0d-f3cf25b2.th",
            },
            ModelFile {
                name: "htdemucs_ft.yaml",
                url: "https://raw.githubusercontent.com/facebookresearch/demucs/main/demucs/remote/htdemucs_ft.yaml",
            },
        ],
    },
    ModelSpec {
        name: "UVR-MDX-NET-Voc_FT",
        tool: ToolFamily::AudioSeparator,
        files: &[ModelFile {
            name: "UVR-MDX-NET-Voc_FT.onnx",
            url: "https://github.com/TRvlvr/model_repo/releases/download/all_public_uvr_models/UVR-MDX-NET-Voc_FT.onnx",
        }],
    },
];

/// Look up a model spec by request name.
pub fn model_spec(name: &str) -> Option<&'static ModelSpec> {
    MODEL_SPECS.iter().find(|spec| spec.name == name)
}

/// Marker file recording that legacy migration already ran.
const MIGRATED_MARKER: &str = ".migrated";

/// The shared on-disk model store.
pub struct ModelCache {
    config_root: PathBuf,
    client: reqwest::Client,
    /// In-process advisory lock per model directory.
    dir_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ModelCache {
    /// Create a cache rooted at the config root.
    pub fn new(config_root: PathBuf) -> Self {
        Self {
            config_root,
            client: reqwest::Client::new(),
            dir_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Shared model directory for a tool family.
    pub fn model_dir(&self, tool: ToolFamily) -> PathBuf {
        self.config_root.join(tool.dir_name())
    }

    /// Whether every expected file of a model is present and non-empty.
    pub fn is_ready(&self, spec: &ModelSpec) -> bool {
        self.missing_files(spec).is_empty()
    }

    /// The expected files not yet present on disk.
    pub fn missing_files(&self, spec: &ModelSpec) -> Vec<&'static ModelFile> {
        let dir = self.model_dir(spec.tool);
        spec.files
            .iter()
            .filter(|file| {
                let path = dir.join(file.name);
                !std::fs::metadata(&path).is_ok_and(|m| m.len() > 0)
            })
            .collect()
    }

    async fn dir_lock(&self, dir: &PathBuf) -> Arc<Mutex<()>> {
        let mut locks = self.dir_locks.lock().await;
        locks.entry(dir.clone()).or_default().clone()
    }

    /// Download every missing file of a model, with progress on the model
    /// download bar. Failures come back as `ModelDownloadFailed` so the
    /// retry layer can attach a `DownloadExpectation`.
    pub async fn pre_download_model(
        &self,
        spec: &ModelSpec,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let dir = self.model_dir(spec.tool);
        let lock = self.dir_lock(&dir).await;
        let _guard = lock.lock().await;

        // Re-check under the lock: another task may have finished the work.
        let missing = self.missing_files(spec);
        if missing.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&dir).await?;

        let total_files = missing.len();
        for (i, file) in missing.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(LangkitError::Cancelled);
            }
            let dest = dir.join(file.name);
            let description = format!(
                "Downloading {} ({}/{})",
                file.name,
                i + 1,
                total_files
            );
            let result = downloader::download_file(
                &self.client,
                file.url,
                &dest,
                cancel,
                |done, total| {
                    let percent = match total {
                        Some(total) if total > 0 => {
                            ((done as f64 / total as f64) * 100.0) as u32
                        }
                        _ => 0,
                    };
                    reporter.update_sized(
                        BAR_DEMUCS_MODEL_DL,
                        percent.min(100),
                        100,
                        "model-download",
                        &description,
                        Some(humanize_bytes(done)),
                    );
                },
            )
            .await;

            match result {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    return Err(LangkitError::model_download(spec.name, e.to_string()));
                }
            }
        }
        Ok(())
    }

    /// One-time migration from the legacy per-container model layout.
    ///
    /// Legacy files may be root-owned, so the copy + chown runs inside a
    /// throwaway container with both directories mounted. Files already in
    /// the shared cache are never overwritten, which keeps two
    /// installations sharing a config root from clobbering each other.
    pub async fn migrate_legacy(&self, tool: ToolFamily) -> Result<()> {
        let shared = self.model_dir(tool);
        let legacy = self.config_root.join(tool.legacy_dir_name());
        let marker = shared.join(MIGRATED_MARKER);

        if marker.exists() || !legacy.is_dir() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&shared).await?;

        let uid_gid = current_uid_gid().await;
        info!(
            "migrating legacy {} models from {} to {}",
            tool.dir_name(),
            legacy.display(),
            shared.display()
        );
        let script = format!(
            "cp -rn /legacy/. /shared/ && chown -R {} /shared",
            uid_gid
        );
        crate::docker::run_throwaway(
            "alpine:3.20",
            &[
                (legacy.clone(), PathBuf::from("/legacy")),
                (shared.clone(), PathBuf::from("/shared")),
            ],
            &["sh", "-c", &script],
        )
        .await?;

        tokio::fs::write(&marker, b"").await?;
        if let Err(e) = tokio::fs::remove_dir_all(&legacy).await {
            warn!("legacy model dir left in place: {}", e);
        }
        Ok(())
    }
}

/// The invoking user's `uid:gid` for the migration chown; root as fallback.
async fn current_uid_gid() -> String {
    #[cfg(unix)]
    {
        let uid = tokio::process::Command::new("id").arg("-u").output().await;
        let gid = tokio::process::Command::new("id").arg("-g").output().await;
        if let (Ok(uid), Ok(gid)) = (uid, gid) {
            if uid.status.success() && gid.status.success() {
                return format!(
                    "{}:{}",
                    String::from_utf8_lossy(&uid.stdout).trim(),
                    String::from_utf8_lossy(&gid.stdout).trim()
                );
            }
        }
    }
    "0:0".to_string()
}
