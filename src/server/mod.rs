//! Loopback RPC surface and WebSocket push channel.

mod http;
mod ws;

pub use http::{router, serve};

use std::sync::Arc;

use crate::config::ConfigService;
use crate::dependency::DependencyService;
use crate::event::{EventHub, EventThrottler};
use crate::providers::ProviderRegistry;
use crate::task::TaskEngine;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    /// The single-instance task engine.
    pub engine: TaskEngine,
    /// Broadcast hub the WebSocket drains.
    pub hub: Arc<EventHub>,
    /// Event egress and throttling control.
    pub throttler: Arc<EventThrottler>,
    /// Provider resolution and the model catalog.
    pub registry: Arc<ProviderRegistry>,
    /// Settings source.
    pub config: Arc<dyn ConfigService>,
    /// Dependency probes and tool downloads.
    pub dependency: Arc<DependencyService>,
}
