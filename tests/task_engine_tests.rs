//! Integration tests for the task engine's lock, pending-cancel window and
//! completion events.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use langkit::config::{CredentialStore, Settings, TestConfigService};
use langkit::event::{
    EventHub, EventSink, EventThrottler, WireEvent, CHANNEL_PROCESSING_COMPLETED,
    CHANNEL_PROCESSING_STARTED,
};
use langkit::media::MediaToolkit;
use langkit::providers::ProviderRegistry;
use langkit::stt::SttEngine;
use langkit::task::{EngineDeps, ProcessingRequest, TaskEngine};

fn engine_with_hub(tmp: &TempDir) -> (TaskEngine, Arc<EventHub>) {
    let hub = Arc::new(EventHub::new(1024));
    let throttler = Arc::new(EventThrottler::new(hub.clone() as Arc<dyn EventSink>));
    let registry = Arc::new(ProviderRegistry::new(Arc::new(CredentialStore::new())));
    let deps = Arc::new(EngineDeps {
        config: Arc::new(TestConfigService::new(tmp.path(), Settings::default())),
        throttler,
        registry: registry.clone(),
        media: Arc::new(MediaToolkit::default()),
        stt: Arc::new(SttEngine::new(registry)),
    });
    (TaskEngine::new(deps), hub)
}

async fn wait_for_completion(
    rx: &mut tokio::sync::broadcast::Receiver<WireEvent>,
) -> (bool, serde_json::Value) {
    let mut started = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("completion must be observable within 5s")
            .expect("hub closed");
        match event.channel.as_str() {
            CHANNEL_PROCESSING_STARTED => started = true,
            CHANNEL_PROCESSING_COMPLETED => return (started, event.payload),
            _ => {}
        }
    }
}

/// Scenario: cancel arrives first, then the start request shortly after.
#[tokio::test]
async fn cancel_before_start_defeats_the_start() {
    let tmp = TempDir::new().unwrap();
    let (engine, hub) = engine_with_hub(&tmp);
    let mut rx = hub.subscribe();

    engine.cancel_processing();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let media = tmp.path().join("demo.mp4");
    std::fs::write(&media, b"").unwrap();
    let status = engine.send_processing_request(ProcessingRequest {
        path: media.to_string_lossy().to_string(),
        target_language: "ja".into(),
        subs2cards: true,
        ..ProcessingRequest::default()
    });

    assert!(!status.is_processing);
    assert!(status.error.is_none());
    // No processing.started may ever be emitted.
    let leaked = tokio::time::timeout(Duration::from_millis(400), rx.recv()).await;
    assert!(leaked.is_err(), "consumed cancel must not start a task");
    assert!(!engine.get_processing_status().is_processing);
}

/// Scenario: the selected model's provider has no credential; the task
/// completes with an error without retrying.
#[tokio::test]
async fn provider_unavailable_completes_with_error() {
    let tmp = TempDir::new().unwrap();
    let (engine, hub) = engine_with_hub(&tmp);
    let mut rx = hub.subscribe();

    let media = tmp.path().join("demo.mp4");
    std::fs::write(&media, b"not a real mp4").unwrap();
    // A sibling subtitle so dubtitles reaches the provider resolution.
    std::fs::write(
        tmp.path().join("demo.srt"),
        "1\n00:00:01,000 --> 00:00:02,000\nhi\n\n",
    )
    .unwrap();

    let mut request = ProcessingRequest {
        path: media.to_string_lossy().to_string(),
        target_language: "ja".into(),
        dubtitles: true,
        ..ProcessingRequest::default()
    };
    request
        .options
        .entry("stt".into())
        .or_default()
        .insert("model".into(), serde_json::json!("gpt-4o-transcribe"));

    let status = engine.send_processing_request(request);
    assert!(status.is_processing);

    let (started, completion) = wait_for_completion(&mut rx).await;
    assert!(started);
    assert_eq!(completion["status"], "error");
    assert!(!engine.get_processing_status().is_processing);
}

/// Cancelling an active task makes the completion event observable within
/// five seconds, after which the engine reads idle.
#[tokio::test]
async fn cancellation_completes_promptly() {
    let tmp = TempDir::new().unwrap();
    let (engine, hub) = engine_with_hub(&tmp);
    let mut rx = hub.subscribe();

    let dir = tmp.path().join("bulk");
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..50 {
        std::fs::write(dir.join(format!("clip-{:03}.wav", i)), b"RIFF").unwrap();
    }

    let status = engine.send_processing_request(ProcessingRequest {
        path: dir.to_string_lossy().to_string(),
        bulk: true,
        target_language: "ja".into(),
        subs2cards: true,
        ..ProcessingRequest::default()
    });
    assert!(status.is_processing);

    engine.cancel_processing();
    let (_, completion) = wait_for_completion(&mut rx).await;
    assert_eq!(completion["status"], "error");

    // The lock is released once the completion fires.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.get_processing_status().is_processing {
        assert!(tokio::time::Instant::now() < deadline, "engine stuck active");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// A pending cancel older than the window is ignored by the next start.
#[tokio::test]
async fn stale_pending_cancel_does_not_block_start() {
    let tmp = TempDir::new().unwrap();
    let (engine, hub) = engine_with_hub(&tmp);
    let mut rx = hub.subscribe();

    engine.cancel_processing();
    tokio::time::sleep(Duration::from_millis(2200)).await;

    let media = tmp.path().join("demo.mp4");
    std::fs::write(&media, b"").unwrap();
    let status = engine.send_processing_request(ProcessingRequest {
        path: media.to_string_lossy().to_string(),
        target_language: "ja".into(),
        subs2cards: true,
        ..ProcessingRequest::default()
    });

    // The stale cancel was discarded, so this start goes through.
    assert!(status.is_processing);
    assert!(status.error.is_none());
    let (started, _) = wait_for_completion(&mut rx).await;
    assert!(started);
}
