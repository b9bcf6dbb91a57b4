//! Shared helpers for integration tests.

use std::sync::Arc;

use langkit::event::{EventHub, EventSink, EventThrottler};
use langkit::progress::{compute_importance_map, ProgressReporter};
use langkit::task::{FeatureSet, Mode};

/// Hub + throttler + reporter wired the way the engine wires them.
pub fn event_stack(mode: Mode, bulk: bool, features: FeatureSet) -> (Arc<EventHub>, Arc<EventThrottler>, ProgressReporter) {
    let hub = Arc::new(EventHub::new(1024));
    let throttler = Arc::new(EventThrottler::new(hub.clone() as Arc<dyn EventSink>));
    let map = compute_importance_map(mode, bulk, &features);
    let reporter = ProgressReporter::new(throttler.clone(), map);
    (hub, throttler, reporter)
}

/// Feature set with only the separation feature on.
pub fn enhance_only() -> FeatureSet {
    FeatureSet {
        enhance: true,
        translit: false,
        condense: false,
        stt: false,
    }
}
