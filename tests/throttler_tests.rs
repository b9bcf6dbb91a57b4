//! Integration tests for the adaptive event throttler against the real hub.

mod common;

use std::time::Duration;

use serde_json::{json, Value};

use langkit::event::{progress_channel, WireEvent};
use langkit::task::Mode;

async fn drain(
    rx: &mut tokio::sync::broadcast::Receiver<WireEvent>,
    window: Duration,
) -> Vec<WireEvent> {
    let mut events = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(window, rx.recv()).await {
        events.push(event);
    }
    events
}

fn payload_count(events: &[WireEvent]) -> usize {
    events
        .iter()
        .map(|e| match &e.payload {
            Value::Array(items) => items.len(),
            _ => 1,
        })
        .sum()
}

#[tokio::test]
async fn sync_flush_delivers_every_posted_event() {
    let (hub, throttler, _reporter) = common::event_stack(Mode::Enhance, false, common::enhance_only());
    let mut rx = hub.subscribe();

    for i in 0..50 {
        throttler.add_event("misc", json!({ "n": i }));
    }
    throttler.sync_flush().await;

    let events = drain(&mut rx, Duration::from_millis(200)).await;
    assert_eq!(payload_count(&events), 50, "no event may be dropped below overload");
    throttler.shutdown().await;
}

#[tokio::test]
async fn progress_events_coalesce_to_latest_per_bar() {
    let (hub, throttler, reporter) = common::event_stack(Mode::Enhance, false, common::enhance_only());
    let mut rx = hub.subscribe();

    for percent in [10_u32, 30, 70, 95] {
        reporter.update("demucs-process", percent, 100, "separate", "Processing");
    }
    throttler.sync_flush().await;

    let events = drain(&mut rx, Duration::from_millis(200)).await;
    let on_bar: Vec<&WireEvent> = events
        .iter()
        .filter(|e| e.channel == progress_channel("demucs-process"))
        .collect();
    assert_eq!(on_bar.len(), 1);
    assert_eq!(on_bar[0].payload["increment"], 95);
    throttler.shutdown().await;
}

#[tokio::test]
async fn progress_sequence_is_non_decreasing_across_flushes() {
    let (hub, throttler, reporter) = common::event_stack(Mode::Enhance, false, common::enhance_only());
    let mut rx = hub.subscribe();

    // Interleave updates with flushes so multiple batches reach the hub,
    // including an out-of-order report that must be suppressed.
    for percent in [5_u32, 20, 15, 40, 100] {
        reporter.update("demucs-process", percent, 100, "separate", "Processing");
        throttler.sync_flush().await;
    }

    let events = drain(&mut rx, Duration::from_millis(200)).await;
    let mut seen = Vec::new();
    for event in &events {
        if event.channel != progress_channel("demucs-process") {
            continue;
        }
        match &event.payload {
            Value::Array(items) => {
                seen.extend(items.iter().map(|i| i["increment"].as_u64().unwrap()))
            }
            single => seen.push(single["increment"].as_u64().unwrap()),
        }
    }
    assert!(!seen.is_empty());
    assert!(
        seen.windows(2).all(|w| w[0] <= w[1]),
        "sequence must be non-decreasing: {:?}",
        seen
    );
    assert_eq!(*seen.last().unwrap(), 100);
    throttler.shutdown().await;
}

#[tokio::test]
async fn status_reflects_toggling() {
    let (_hub, throttler, _reporter) = common::event_stack(Mode::Enhance, false, common::enhance_only());

    assert!(throttler.status().enabled);
    throttler.set_enabled(false);
    throttler.sync_flush().await;
    let status = throttler.status();
    assert!(!status.enabled);
    assert_eq!(status.dropped_events, 0);
    throttler.shutdown().await;
}
