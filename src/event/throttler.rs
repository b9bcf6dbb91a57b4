//! Adaptive event throttler.
//!
//! Producers post events at arbitrary rates; a single worker task owns the
//! buffers, wakes on a timer whose period adapts to the measured event rate,
//! and hands batches to the broadcast sink. Progress events are coalesced
//! per bar id so a fast-moving bar never floods the transport with stale
//! percentages.
//!
//! Producers never block: the ingress queue is bounded with drop-oldest
//! semantics and every drop is counted and surfaced through
//! [`EventThrottler::status`]. Control messages (enable, flush, shutdown,
//! interval updates) travel on a separate channel that is never dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{EventSink, CHANNEL_LOG, PROGRESS_CHANNEL_PREFIX};

/// Sliding window over which the event rate is measured.
const RATE_WINDOW: Duration = Duration::from_millis(500);
/// Event rate (events/s) at which the interval saturates at its maximum.
const RATE_CEILING: f64 = 100.0;
/// Hard lower clamp on the adaptive interval.
const INTERVAL_FLOOR: Duration = Duration::from_millis(50);
/// Hard upper clamp on the adaptive interval.
const INTERVAL_CEILING: Duration = Duration::from_millis(1000);
/// Default ingress queue capacity before drop-oldest kicks in.
const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Snapshot of the throttler state for the status RPC.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottlerStatus {
    /// Whether adaptive batching is on; off means pass-through.
    pub enabled: bool,
    /// Measured event rate over the sliding window, events per second.
    pub current_rate: f64,
    /// Current worker tick interval in milliseconds.
    pub current_interval_ms: u64,
    /// Events dropped by the bounded ingress queue since startup.
    pub dropped_events: u64,
}

enum Control {
    SetEnabled(bool),
    SetMinInterval(Duration),
    SetMaxInterval(Duration),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

struct Shared {
    queue: Mutex<VecDeque<(String, Value)>>,
    queue_capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
    status: Mutex<ThrottlerStatus>,
}

/// Handle to the throttler worker.
pub struct EventThrottler {
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventThrottler {
    /// Create a throttler broadcasting into `sink`, with default queue size.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_queue_capacity(sink, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a throttler with an explicit ingress queue capacity.
    pub fn with_queue_capacity(sink: Arc<dyn EventSink>, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            queue_capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
            status: Mutex::new(ThrottlerStatus {
                enabled: true,
                current_rate: 0.0,
                current_interval_ms: INTERVAL_FLOOR.as_millis() as u64,
                dropped_events: 0,
            }),
        });
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            shared: Arc::clone(&shared),
            control_rx,
            sink,
            buffers: Vec::new(),
            arrivals: VecDeque::new(),
            enabled: true,
            min_interval: Duration::from_millis(100),
            max_interval: INTERVAL_CEILING,
            interval: Duration::from_millis(100),
        };
        let handle = tokio::spawn(worker.run());
        Self {
            shared,
            control: control_tx,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Post one event. Never blocks; under overload the oldest queued event
    /// is dropped and counted.
    pub fn add_event(&self, channel: &str, payload: Value) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.len() >= self.shared.queue_capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back((channel.to_string(), payload));
        }
        self.shared.notify.notify_one();
    }

    /// Turn adaptive batching on or off. Off means direct pass-through.
    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.control.send(Control::SetEnabled(enabled));
    }

    /// Set the minimum tick interval; zero means pass-through while enabled.
    pub fn set_min_interval(&self, interval: Duration) {
        let _ = self.control.send(Control::SetMinInterval(interval));
    }

    /// Set the maximum tick interval.
    pub fn set_max_interval(&self, interval: Duration) {
        let _ = self.control.send(Control::SetMaxInterval(interval));
    }

    /// Drain every buffered event through the sink; returns once the sink
    /// calls for everything posted before this call have returned.
    pub async fn sync_flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop the worker after a best-effort final flush.
    pub async fn shutdown(&self) {
        let _ = self.control.send(Control::Shutdown);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                warn!("throttler worker ended abnormally");
            }
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> ThrottlerStatus {
        let mut status = self.shared.status.lock().unwrap().clone();
        status.dropped_events = self.shared.dropped.load(Ordering::Relaxed);
        status
    }
}

/// The single task that owns all buffers.
struct Worker {
    shared: Arc<Shared>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    sink: Arc<dyn EventSink>,
    /// Channel buffers in first-arrival order.
    buffers: Vec<(String, Vec<Value>)>,
    /// Arrival timestamps inside the rate window.
    arrivals: VecDeque<Instant>,
    enabled: bool,
    min_interval: Duration,
    max_interval: Duration,
    interval: Duration,
}

impl Worker {
    async fn run(mut self) {
        enum Wake {
            Posted,
            Control(Option<Control>),
            Tick,
        }

        let shared = Arc::clone(&self.shared);
        let mut next_tick = Instant::now() + self.tick_period();
        loop {
            // The handlers mutate the whole worker, so the select only
            // classifies the wakeup and the work happens afterwards.
            let wake = tokio::select! {
                _ = shared.notify.notified() => Wake::Posted,
                cmd = self.control_rx.recv() => Wake::Control(cmd),
                _ = tokio::time::sleep_until(next_tick) => Wake::Tick,
            };
            match wake {
                Wake::Posted => {
                    self.drain_queue();
                    if self.pass_through() {
                        self.flush_buffers();
                    }
                }
                Wake::Control(cmd) => {
                    match cmd {
                        Some(Control::SetEnabled(enabled)) => {
                            self.enabled = enabled;
                            if !enabled {
                                self.drain_queue();
                                self.flush_buffers();
                            }
                            debug!("event throttling {}", if enabled { "enabled" } else { "disabled" });
                        }
                        Some(Control::SetMinInterval(d)) => {
                            self.min_interval = d;
                            if self.pass_through() {
                                self.drain_queue();
                                self.flush_buffers();
                            }
                        }
                        Some(Control::SetMaxInterval(d)) => self.max_interval = d,
                        Some(Control::Flush(ack)) => {
                            self.drain_queue();
                            self.flush_buffers();
                            let _ = ack.send(());
                        }
                        Some(Control::Shutdown) | None => {
                            // Best-effort delivery of the last batch.
                            self.drain_queue();
                            self.flush_buffers();
                            break;
                        }
                    }
                    self.publish_status();
                }
                Wake::Tick => {
                    self.drain_queue();
                    self.flush_buffers();
                    self.adapt_interval();
                    next_tick = Instant::now() + self.tick_period();
                    self.publish_status();
                }
            }
        }
    }

    fn pass_through(&self) -> bool {
        !self.enabled || self.min_interval.is_zero()
    }

    fn tick_period(&self) -> Duration {
        if self.pass_through() {
            // Idle heartbeat only; events are delivered on arrival.
            INTERVAL_CEILING
        } else {
            self.interval
        }
    }

    fn drain_queue(&mut self) {
        let drained: Vec<(String, Value)> = {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.drain(..).collect()
        };
        let now = Instant::now();
        for (channel, payload) in drained {
            self.arrivals.push_back(now);
            match self.buffers.iter_mut().find(|(c, _)| *c == channel) {
                Some((_, events)) => events.push(payload),
                None => self.buffers.push((channel, vec![payload])),
            }
        }
    }

    fn flush_buffers(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        for (channel, events) in std::mem::take(&mut self.buffers) {
            if events.is_empty() {
                continue;
            }
            if channel == CHANNEL_LOG || channel.starts_with("log.") {
                // Log consumers always expect an array.
                self.sink.deliver(&channel, Value::Array(events));
            } else if channel.starts_with(PROGRESS_CHANNEL_PREFIX) {
                let coalesced = coalesce_progress(events);
                self.deliver_one_or_batch(&channel, coalesced);
            } else {
                self.deliver_one_or_batch(&channel, events);
            }
        }
    }

    fn deliver_one_or_batch(&self, channel: &str, mut events: Vec<Value>) {
        if events.len() == 1 {
            self.sink.deliver(channel, events.pop().unwrap());
        } else {
            self.sink.deliver(channel, Value::Array(events));
        }
    }

    fn adapt_interval(&mut self) {
        if let Some(cutoff) = Instant::now().checked_sub(RATE_WINDOW) {
            while self.arrivals.front().is_some_and(|t| *t < cutoff) {
                self.arrivals.pop_front();
            }
        }
        let rate = self.arrivals.len() as f64 / RATE_WINDOW.as_secs_f64();
        let ratio = (rate / RATE_CEILING).clamp(0.0, 1.0);
        let span = self
            .max_interval
            .saturating_sub(self.min_interval)
            .as_secs_f64();
        let target = self.min_interval.as_secs_f64() + span * ratio;
        self.interval = Duration::from_secs_f64(target).clamp(INTERVAL_FLOOR, INTERVAL_CEILING);
    }

    fn publish_status(&self) {
        let rate = self.arrivals.len() as f64 / RATE_WINDOW.as_secs_f64();
        let mut status = self.shared.status.lock().unwrap();
        status.enabled = self.enabled;
        status.current_rate = rate;
        status.current_interval_ms = self.tick_period().as_millis() as u64;
    }
}

/// Keep only the latest payload per bar id, preserving first-seen order.
/// Payloads without a bar id, and bar lifecycle markers (`removed`), are
/// kept as-is so a retraction is never swallowed by a later update.
fn coalesce_progress(events: Vec<Value>) -> Vec<Value> {
    let mut order: Vec<Option<String>> = Vec::new();
    let mut latest: Vec<Value> = Vec::new();
    for event in events {
        let key = event
            .get("barId")
            .and_then(|v| v.as_str())
            .filter(|_| event.get("removed").is_none())
            .map(str::to_string);
        match key {
            Some(ref id) => {
                if let Some(pos) = order.iter().position(|k| k.as_deref() == Some(id)) {
                    latest[pos] = event;
                } else {
                    order.push(key);
                    latest.push(event);
                }
            }
            None => {
                order.push(None);
                latest.push(event);
            }
        }
    }
    latest
}
