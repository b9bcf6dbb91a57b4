//! Event plumbing: the broadcast hub and the adaptive throttler.
//!
//! Everything the pipeline wants a client to see flows through here:
//! producers call [`EventThrottler::add_event`], the throttler batches and
//! coalesces, and the [`EventHub`] fans the result out to every connected
//! WebSocket subscriber.

mod hub;
mod throttler;

pub use hub::{EventHub, OnConnectFn};
pub use throttler::{EventThrottler, ThrottlerStatus};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel on which a task announces it started.
pub const CHANNEL_PROCESSING_STARTED: &str = "processing.started";
/// Channel on which a task announces it finished, with status.
pub const CHANNEL_PROCESSING_COMPLETED: &str = "processing.completed";
/// Prefix of per-bar progress channels.
pub const PROGRESS_CHANNEL_PREFIX: &str = "progress.";
/// Channel carrying log lines; always delivered batched.
pub const CHANNEL_LOG: &str = "log";

/// Per-bar progress channel name for the given bar id.
pub fn progress_channel(bar_id: &str) -> String {
    format!("{}{}", PROGRESS_CHANNEL_PREFIX, bar_id)
}

/// Channel carrying download progress for an external tool.
pub fn download_channel(tool: &str) -> String {
    format!("download.{}.progress", tool)
}

/// One event as it crosses the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    /// Logical channel name, e.g. `processing.started`.
    pub channel: String,
    /// JSON payload; a batch is an array payload on the same channel.
    pub payload: Value,
}

/// Transport-agnostic sink the throttler broadcasts into.
///
/// Production wires this to the [`EventHub`]; tests substitute a recorder.
pub trait EventSink: Send + Sync {
    /// Deliver one payload (or batch) on a channel. Must not block for long.
    fn deliver(&self, channel: &str, payload: Value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(progress_channel("item-bar"), "progress.item-bar");
        assert_eq!(download_channel("ffmpeg"), "download.ffmpeg.progress");
    }
}
