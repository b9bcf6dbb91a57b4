//! Progress events and the per-task reporter.
//!
//! Every long-running stage reports through a [`ProgressReporter`], which
//! stamps the bar's importance, enforces monotonic percentages per bar and
//! forwards the event to the throttler on the bar's channel.

pub mod importance;

pub use importance::{compute_importance_map, ImportanceLevel, ImportanceMap};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::json;

use crate::event::{progress_channel, EventThrottler};

/// One progress update as serialized onto a bar channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Stable bar identifier, e.g. `demucs-process`.
    pub bar_id: String,
    /// Machine-readable operation tag, e.g. `separate`.
    pub operation: String,
    /// Human-readable description shown next to the bar.
    pub description: String,
    /// Current position.
    pub increment: u32,
    /// Position at which the bar is complete.
    pub total: u32,
    /// Ordinal importance of this bar for the frontend.
    pub priority: ImportanceLevel,
    /// Pretty byte size, present for download bars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humanized_size: Option<String>,
}

/// Per-task progress reporter.
///
/// Cheap to clone; all clones share the monotonic guard so a bar can be
/// driven from more than one stage without ever moving backwards.
#[derive(Clone)]
pub struct ProgressReporter {
    throttler: Arc<EventThrottler>,
    importance: Arc<ImportanceMap>,
    last_position: Arc<Mutex<HashMap<String, u32>>>,
}

impl ProgressReporter {
    /// Create a reporter bound to a throttler and an importance map.
    pub fn new(throttler: Arc<EventThrottler>, importance: ImportanceMap) -> Self {
        Self {
            throttler,
            importance: Arc::new(importance),
            last_position: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Report a bar position. A position lower than the bar's previous one
    /// is suppressed so consumers always observe non-decreasing progress.
    pub fn update(&self, bar_id: &str, increment: u32, total: u32, operation: &str, description: &str) {
        self.update_sized(bar_id, increment, total, operation, description, None);
    }

    /// Report a bar position together with a pretty byte size.
    pub fn update_sized(
        &self,
        bar_id: &str,
        increment: u32,
        total: u32,
        operation: &str,
        description: &str,
        humanized_size: Option<String>,
    ) {
        {
            let mut last = self.last_position.lock().unwrap();
            let previous = last.get(bar_id).copied().unwrap_or(0);
            if increment < previous {
                return;
            }
            last.insert(bar_id.to_string(), increment);
        }
        let event = ProgressEvent {
            bar_id: bar_id.to_string(),
            operation: operation.to_string(),
            description: description.to_string(),
            increment,
            total,
            priority: self.importance.level_for(bar_id),
            humanized_size,
        };
        self.throttler.add_event(
            &progress_channel(bar_id),
            serde_json::to_value(&event).unwrap_or_default(),
        );
    }

    /// Remove a bar: clears the monotonic guard (the next update may start
    /// from zero again) and tells subscribers to drop the bar.
    pub fn remove_bar(&self, bar_id: &str) {
        self.last_position.lock().unwrap().remove(bar_id);
        self.throttler.add_event(
            &progress_channel(bar_id),
            json!({ "barId": bar_id, "removed": true }),
        );
    }

    /// The importance map backing this reporter.
    pub fn importance(&self) -> &ImportanceMap {
        &self.importance
    }
}

/// Render a byte count the way humans read download sizes.
pub fn humanize_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventHub, EventSink};
    use crate::task::{FeatureSet, Mode};

    fn test_reporter() -> (Arc<EventHub>, ProgressReporter) {
        let hub = Arc::new(EventHub::new(64));
        let throttler = Arc::new(EventThrottler::new(hub.clone() as Arc<dyn EventSink>));
        let map = compute_importance_map(
            Mode::Enhance,
            false,
            &FeatureSet {
                enhance: true,
                translit: false,
                condense: false,
                stt: false,
            },
        );
        (hub.clone(), ProgressReporter::new(throttler, map))
    }

    #[tokio::test]
    async fn test_monotonic_guard_suppresses_dips() {
        let (hub, reporter) = test_reporter();
        let mut rx = hub.subscribe();
        reporter.update("demucs-process", 40, 100, "separate", "Processing");
        reporter.update("demucs-process", 30, 100, "separate", "Processing");
        reporter.update("demucs-process", 50, 100, "separate", "Processing");
        // Drain what actually went out.
        let mut seen = Vec::new();
        while let Ok(event) =
            tokio::time::timeout(std::time::Duration::from_millis(300), rx.recv()).await
        {
            let event = event.unwrap();
            match &event.payload {
                serde_json::Value::Array(items) => {
                    seen.extend(items.iter().map(|e| e["increment"].as_u64().unwrap()))
                }
                single => seen.push(single["increment"].as_u64().unwrap()),
            }
            if seen.iter().any(|&p| p == 50) {
                break;
            }
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "dips leaked: {:?}", seen);
        assert!(!seen.contains(&30));
    }

    #[tokio::test]
    async fn test_remove_bar_resets_guard() {
        let (_hub, reporter) = test_reporter();
        reporter.update("demucs-model-dl", 80, 100, "download", "Downloading model");
        reporter.remove_bar("demucs-model-dl");
        // After removal the bar may legitimately restart from zero.
        assert!(reporter.last_position.lock().unwrap().get("demucs-model-dl").is_none());
    }

    #[test]
    fn test_humanize_bytes() {
        assert_eq!(humanize_bytes(512), "512 B");
        assert_eq!(humanize_bytes(2048), "2.0 KiB");
        assert_eq!(humanize_bytes(80_530_636), "76.8 MiB");
    }
}
