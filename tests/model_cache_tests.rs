//! Model cache pre-download behaviour: atomic placement, failure cleanup,
//! retry with partial-file wiping.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use langkit::error::LangkitError;
use langkit::models::{ModelCache, ModelFile, ModelSpec, ToolFamily};
use langkit::retry::{DownloadExpectation, RetryPolicy};
use langkit::task::Mode;

/// Build a `'static` spec pointing at the mock server.
fn leaked_spec(server_uri: &str) -> &'static ModelSpec {
    let url: &'static str = Box::leak(format!("{}/weights.th", server_uri).into_boxed_str());
    let files: &'static [ModelFile] = Box::leak(
        vec![ModelFile {
            name: "weights.th",
            url,
        }]
        .into_boxed_slice(),
    );
    Box::leak(Box::new(ModelSpec {
        name: "testmodel",
        tool: ToolFamily::Demucs,
        files,
    }))
}

#[tokio::test]
async fn successful_predownload_places_every_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weights.th"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![42u8; 8192]))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let cache = ModelCache::new(tmp.path().to_path_buf());
    let spec = leaked_spec(&server.uri());
    let (_hub, throttler, reporter) =
        common::event_stack(Mode::Enhance, false, common::enhance_only());

    cache
        .pre_download_model(spec, &reporter, &CancellationToken::new())
        .await
        .unwrap();

    let file = cache.model_dir(ToolFamily::Demucs).join("weights.th");
    let metadata = std::fs::metadata(&file).unwrap();
    assert_eq!(metadata.len(), 8192);
    assert!(cache.is_ready(spec));
    assert!(!file.with_extension("th.part").exists());
    throttler.shutdown().await;
}

#[tokio::test]
async fn failed_download_returns_sentinel_and_no_partial() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weights.th"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let cache = ModelCache::new(tmp.path().to_path_buf());
    let spec = leaked_spec(&server.uri());
    let (_hub, throttler, reporter) =
        common::event_stack(Mode::Enhance, false, common::enhance_only());

    let err = cache
        .pre_download_model(spec, &reporter, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LangkitError::ModelDownloadFailed { .. }));

    let dir = cache.model_dir(ToolFamily::Demucs);
    let leftovers: Vec<_> = std::fs::read_dir(&dir)
        .map(|entries| entries.filter_map(|e| e.ok()).collect())
        .unwrap_or_default();
    assert!(
        leftovers.is_empty(),
        "no partial files may remain: {:?}",
        leftovers
    );
    throttler.shutdown().await;
}

/// Scenario: first attempt fails, retry cleans up, second attempt succeeds.
/// Exactly one file exists at the end and the download bar was retracted
/// between attempts.
#[tokio::test]
async fn retry_with_expectation_cleans_between_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weights.th"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/weights.th"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 2048]))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let cache = Arc::new(ModelCache::new(tmp.path().to_path_buf()));
    let spec = leaked_spec(&server.uri());
    let (hub, throttler, reporter) =
        common::event_stack(Mode::Enhance, false, common::enhance_only());
    let mut rx = hub.subscribe();

    let expectation = DownloadExpectation {
        model_dir: cache.model_dir(ToolFamily::Demucs),
        model_files: spec.files.iter().map(|f| f.name.to_string()).collect(),
        progress_bar_ids: vec!["demucs-model-dl".to_string()],
        reporter: reporter.clone(),
    };

    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
    };
    let cancel = CancellationToken::new();
    policy
        .run_with_hook(
            || cache.pre_download_model(spec, &reporter, &cancel),
            |_, err| {
                if matches!(err, LangkitError::ModelDownloadFailed { .. }) {
                    expectation.cleanup();
                }
            },
        )
        .await
        .unwrap();

    // Exactly one file in the model dir (ignoring nothing: no .part, no dup).
    let dir = cache.model_dir(ToolFamily::Demucs);
    let entries: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(entries, vec!["weights.th".to_string()]);

    // The bar was retracted between attempts.
    throttler.sync_flush().await;
    let mut saw_removed = false;
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(300), rx.recv()).await
    {
        let payloads: Vec<&serde_json::Value> = match &event.payload {
            serde_json::Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        for payload in payloads {
            if payload.get("removed").and_then(|v| v.as_bool()) == Some(true) {
                saw_removed = true;
            }
        }
    }
    assert!(saw_removed, "download bar must reset between attempts");
    throttler.shutdown().await;
}
