//! External dependency checks and tool downloads.
//!
//! The engine leans on docker, ffmpeg and mediainfo; the frontend asks for
//! their availability before offering features, and can have ffmpeg or
//! mediainfo fetched into the config root when missing.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::Serialize;
use serde_json::json;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::LangkitError;
use crate::event::{download_channel, EventThrottler};
use crate::models::downloader;
use crate::progress::humanize_bytes;
use crate::Result;

/// Probe endpoint for connectivity checks; returns 204 with an empty body.
const CONNECTIVITY_PROBE_URL: &str = "https://clients3.google.com/generate_204";

/// Result of one availability probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityReport {
    /// Whether the dependency is usable.
    pub available: bool,
    /// Version string when the probe could read one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Probe failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AvailabilityReport {
    fn ok(version: Option<String>) -> Self {
        Self {
            available: true,
            version,
            error: None,
        }
    }

    fn missing(error: String) -> Self {
        Self {
            available: false,
            version: None,
            error: Some(error),
        }
    }
}

/// Dependency checks and downloads.
pub struct DependencyService {
    config_root: PathBuf,
    throttler: Arc<EventThrottler>,
    client: reqwest::Client,
}

impl DependencyService {
    /// Create a service installing tools under `<configRoot>/bin`.
    pub fn new(config_root: PathBuf, throttler: Arc<EventThrottler>) -> Self {
        Self {
            config_root,
            throttler,
            client: reqwest::Client::new(),
        }
    }

    /// Probe the docker CLI and daemon.
    pub async fn check_docker(&self) -> AvailabilityReport {
        probe_command("docker", &["version", "--format", "{{.Server.Version}}"]).await
    }

    /// Probe ffmpeg.
    pub async fn check_ffmpeg(&self) -> AvailabilityReport {
        probe_command("ffmpeg", &["-version"]).await
    }

    /// Probe mediainfo.
    pub async fn check_mediainfo(&self) -> AvailabilityReport {
        probe_command("mediainfo", &["--Version"]).await
    }

    /// Probe internet connectivity with a short HEAD request.
    pub async fn check_internet(&self) -> AvailabilityReport {
        let request = self
            .client
            .head(CONNECTIVITY_PROBE_URL)
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match request {
            Ok(response) if response.status().is_success() => AvailabilityReport::ok(None),
            Ok(response) => AvailabilityReport::missing(format!(
                "connectivity probe answered HTTP {}",
                response.status()
            )),
            Err(e) => AvailabilityReport::missing(e.to_string()),
        }
    }

    /// Download ffmpeg into the config root, streaming progress on
    /// `download.ffmpeg.progress`. Returns the install directory.
    pub async fn download_ffmpeg(&self) -> Result<PathBuf> {
        self.download_tool("ffmpeg", ffmpeg_archive_url()?).await
    }

    /// Download mediainfo into the config root, streaming progress on
    /// `download.mediainfo.progress`.
    pub async fn download_mediainfo(&self) -> Result<PathBuf> {
        self.download_tool("mediainfo", mediainfo_archive_url()?).await
    }

    async fn download_tool(&self, tool: &str, url: &str) -> Result<PathBuf> {
        let bin_dir = self.config_root.join("bin");
        tokio::fs::create_dir_all(&bin_dir).await?;
        let archive = bin_dir.join(format!("{}.zip", tool));
        let channel = download_channel(tool);
        let bar_id = format!("{}-dl", tool);
        let throttler = self.throttler.clone();
        let cancel = CancellationToken::new();

        info!("downloading {} from {}", tool, url);
        downloader::download_file(&self.client, url, &archive, &cancel, |done, total| {
            let percent = match total {
                Some(total) if total > 0 => ((done as f64 / total as f64) * 100.0) as u64,
                _ => 0,
            };
            throttler.add_event(
                &channel,
                json!({
                    "barId": bar_id,
                    "operation": "download",
                    "description": format!("Downloading {}", tool),
                    "increment": percent.min(100),
                    "total": 100,
                    "humanizedSize": humanize_bytes(done),
                }),
            );
        })
        .await?;

        let target = bin_dir.join(tool);
        let archive_for_unpack = archive.clone();
        let target_for_unpack = target.clone();
        tokio::task::spawn_blocking(move || unpack_zip(&archive_for_unpack, &target_for_unpack))
            .await
            .map_err(|e| LangkitError::transient(format!("unpack task failed: {}", e)))??;
        let _ = tokio::fs::remove_file(&archive).await;

        self.throttler.add_event(
            &channel,
            json!({
                "barId": format!("{}-dl", tool),
                "operation": "download",
                "description": format!("{} installed", tool),
                "increment": 100,
                "total": 100,
            }),
        );
        Ok(target)
    }
}

async fn probe_command(program: &str, args: &[&str]) -> AvailabilityReport {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());
            AvailabilityReport::ok(version)
        }
        Ok(output) => AvailabilityReport::missing(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )),
        Err(e) => AvailabilityReport::missing(format!("{} not found: {}", program, e)),
    }
}

fn unpack_zip(archive: &PathBuf, target_dir: &PathBuf) -> Result<()> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| LangkitError::transient(format!("invalid archive: {}", e)))?;
    std::fs::create_dir_all(target_dir)?;
    zip.extract(target_dir)
        .map_err(|e| LangkitError::transient(format!("archive extraction failed: {}", e)))?;
    Ok(())
}

fn ffmpeg_archive_url() -> Result<&'static str> {
    #[cfg(target_os = "linux")]
    return Ok("https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-linux64-gpl.zip");
    #[cfg(target_os = "windows")]
    return Ok("https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-win64-gpl.zip");
    #[cfg(target_os = "macos")]
    return Ok("https://evermeet.cx/ffmpeg/getrelease/zip");
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    Err(LangkitError::validation(
        "no ffmpeg build available for this platform",
    ))
}

fn mediainfo_archive_url() -> Result<&'static str> {
    #[cfg(target_os = "linux")]
    return Ok("https://mediaarea.net/download/binary/mediainfo/24.06/MediaInfo_CLI_24.06_Lambda_x86_64.zip");
    #[cfg(target_os = "windows")]
    return Ok("https://mediaarea.net/download/binary/mediainfo/24.06/MediaInfo_CLI_24.06_Windows_x64.zip");
    #[cfg(target_os = "macos")]
    return Ok("https://mediaarea.net/download/binary/mediainfo/24.06/MediaInfo_CLI_24.06_Mac.zip");
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    Err(LangkitError::validation(
        "no mediainfo build available for this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventHub, EventSink};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_probe_missing_binary_reports_unavailable() {
        let report = probe_command("definitely-not-a-real-binary", &["--version"]).await;
        assert!(!report.available);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn test_download_streams_progress_events() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        // A tiny but valid zip: empty central directory.
        let empty_zip: Vec<u8> = vec![
            0x50, 0x4b, 0x05, 0x06, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        Mock::given(method("GET"))
            .and(path("/tool.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(empty_zip))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let hub = Arc::new(EventHub::new(64));
        let throttler = Arc::new(EventThrottler::new(hub.clone() as Arc<dyn EventSink>));
        let mut rx = hub.subscribe();
        let service = DependencyService::new(tmp.path().to_path_buf(), throttler.clone());

        let url = format!("{}/tool.zip", server.uri());
        let target = service.download_tool("ffmpeg", &url).await.unwrap();
        assert!(target.exists());

        throttler.sync_flush().await;
        let mut saw_download_channel = false;
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_millis(300), rx.recv()).await
        {
            if event.channel == "download.ffmpeg.progress" {
                saw_download_channel = true;
            }
        }
        assert!(saw_download_channel);
    }
}
