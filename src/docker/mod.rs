//! Container lifecycle for the ML separation tools.
//!
//! Each tool family (demucs, audio-separator) owns one [`ContainerRuntime`]
//! which keeps at most one live container per compute mode, pulls the image
//! with progress, renders a compose file into the config dir, and evicts
//! idle containers from a background watcher.

mod manager;
mod pull;

pub use manager::{ContainerHandle, ContainerOptions, ContainerRuntime, ExecOutput};
pub use pull::PullProgressParser;

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::LangkitError;
use crate::models::ToolFamily;
use crate::Result;

/// CPU or GPU container flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeMode {
    Cpu,
    Gpu,
}

impl ComputeMode {
    /// Suffix used in project and container names.
    pub fn suffix(&self) -> &'static str {
        match self {
            ComputeMode::Cpu => "cpu",
            ComputeMode::Gpu => "gpu",
        }
    }
}

/// A tool image and the size the pull progress is computed against.
///
/// The declared size is fixed so the percent can never run backwards when
/// docker reports layers out of order.
#[derive(Debug, Clone, Copy)]
pub struct ContainerImage {
    /// Image reference including tag.
    pub reference: &'static str,
    /// Declared compressed size in bytes.
    pub declared_size_bytes: u64,
}

/// Static container parameters of a tool family.
pub fn image_for(tool: ToolFamily) -> ContainerImage {
    match tool {
        ToolFamily::Demucs => ContainerImage {
            reference: "xserrat/facebook-demucs:latest",
            declared_size_bytes: 7_500_000_000,
        },
        ToolFamily::AudioSeparator => ContainerImage {
            reference: "beveradb/audio-separator:latest",
            declared_size_bytes: 10_000_000_000,
        },
    }
}

/// Short prefix used in bar ids and project names.
pub fn bar_prefix(tool: ToolFamily) -> &'static str {
    match tool {
        ToolFamily::Demucs => "demucs",
        ToolFamily::AudioSeparator => "audiosep",
    }
}

/// Whether stderr points at a missing NVIDIA container runtime.
pub(crate) fn is_gpu_runtime_error(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("could not select device driver")
        || stderr.contains("nvidia-container-cli")
        || stderr.contains("unknown or invalid runtime name: nvidia")
}

/// Run a short-lived container to completion and discard it.
///
/// Used by the model-cache migration to copy and chown root-owned files.
pub async fn run_throwaway(
    image: &str,
    binds: &[(PathBuf, PathBuf)],
    cmd: &[&str],
) -> Result<()> {
    let mut command = Command::new("docker");
    command.arg("run").arg("--rm");
    for (host, container) in binds {
        command.arg("-v").arg(format!(
            "{}:{}",
            host.to_string_lossy(),
            container.to_string_lossy()
        ));
    }
    command.arg(image).args(cmd);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = command
        .output()
        .await
        .map_err(|e| LangkitError::container(format!("failed to launch docker: {}", e)))?;
    if !output.status.success() {
        return Err(LangkitError::container(format!(
            "throwaway container failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_error_detection() {
        assert!(is_gpu_runtime_error(
            "docker: Error response from daemon: could not select device driver \"\" with capabilities: [[gpu]]"
        ));
        assert!(is_gpu_runtime_error(
            "nvidia-container-cli: initialization error"
        ));
        assert!(!is_gpu_runtime_error("no space left on device"));
    }

    #[test]
    fn test_image_table() {
        assert!(image_for(ToolFamily::Demucs).reference.contains("demucs"));
        assert!(image_for(ToolFamily::Demucs).declared_size_bytes > 0);
        assert_eq!(bar_prefix(ToolFamily::AudioSeparator), "audiosep");
    }
}
