//! HTTPS file download with progress, cancellation and atomic placement.
//!
//! Files are streamed into a `.part` sibling with a fixed 32 KiB write
//! buffer, fsynced, then renamed over the final name. A cancelled or failed
//! download never leaves a partial file behind.

use std::path::Path;

use futures::StreamExt;
use log::debug;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::error::LangkitError;
use crate::Result;

/// Fixed write-buffer size for downloads.
pub const DOWNLOAD_BUFFER_SIZE: usize = 32 * 1024;

/// Download `url` to `dest`, reporting `(bytes_done, bytes_total)` after
/// every chunk. `bytes_total` comes from `Content-Length` when present.
pub async fn download_file<F>(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<()>
where
    F: FnMut(u64, Option<u64>),
{
    let parsed = url::Url::parse(url)
        .map_err(|e| LangkitError::validation(format!("invalid download URL '{}': {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(LangkitError::validation(format!(
            "refusing non-HTTP download URL '{}'",
            url
        )));
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = dest.with_extension(match dest.extension() {
        Some(ext) => format!("{}.part", ext.to_string_lossy()),
        None => "part".to_string(),
    });

    let result = stream_to_file(client, url, &tmp, cancel, &mut on_progress).await;
    match result {
        Ok(()) => {
            tokio::fs::rename(&tmp, dest).await?;
            debug!("downloaded {} -> {}", url, dest.display());
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(e)
        }
    }
}

async fn stream_to_file<F>(
    client: &reqwest::Client,
    url: &str,
    tmp: &Path,
    cancel: &CancellationToken,
    on_progress: &mut F,
) -> Result<()>
where
    F: FnMut(u64, Option<u64>),
{
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(LangkitError::transient(format!(
            "download of {} failed with HTTP {}",
            url,
            response.status()
        )));
    }
    let total = response.content_length();

    let file = tokio::fs::File::create(tmp).await?;
    let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFFER_SIZE, file);
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            return Err(LangkitError::Cancelled);
        }
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        on_progress(downloaded, total);
    }

    writer.flush().await?;
    let file = writer.into_inner();
    file.sync_all().await?;

    if let Some(expected) = total {
        if downloaded != expected {
            return Err(LangkitError::transient(format!(
                "download of {} truncated: {} of {} bytes",
                url, downloaded, expected
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_places_file_atomically() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/model.th"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model.th");
        let client = reqwest::Client::new();
        let cancel = CancellationToken::new();
        let mut last = (0, None);
        download_file(
            &client,
            &format!("{}/model.th", server.uri()),
            &dest,
            &cancel,
            |done, total| last = (done, total),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
        assert_eq!(last.0, 4096);
        assert_eq!(last.1, Some(4096));
        // No .part leftovers.
        assert!(!tmp.path().join("model.th.part").exists());
    }

    #[tokio::test]
    async fn test_http_error_leaves_no_partial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.th"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("gone.th");
        let client = reqwest::Client::new();
        let cancel = CancellationToken::new();
        let err = download_file(
            &client,
            &format!("{}/gone.th", server.uri()),
            &dest,
            &cancel,
            |_, _| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LangkitError::Transient { .. }));
        assert!(!dest.exists());
        assert!(!tmp.path().join("gone.th.part").exists());
    }

    #[tokio::test]
    async fn test_non_http_url_rejected() {
        let tmp = TempDir::new().unwrap();
        let client = reqwest::Client::new();
        let err = download_file(
            &client,
            "ftp://example.com/model.th",
            &tmp.path().join("model.th"),
            &CancellationToken::new(),
            |_, _| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LangkitError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_removes_partial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.th"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 1024]))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("slow.th");
        let client = reqwest::Client::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = download_file(
            &client,
            &format!("{}/slow.th", server.uri()),
            &dest,
            &cancel,
            |_, _| {},
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dest.exists());
        assert!(!tmp.path().join("slow.th.part").exists());
    }
}
