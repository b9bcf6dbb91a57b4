//! Task model: requests, feature routing and the single-instance engine.

pub mod engine;
pub mod request;
pub mod routing;

pub use engine::{EngineDeps, ProcessingStatus, TaskEngine};
pub use request::{
    CardsOptions, CondenseOptions, EnhanceOptions, FeatureOptions, ProcessingRequest, SttOptions,
    TranslitOptions,
};
pub use routing::route_mode;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::LangkitError;
use crate::progress::ProgressReporter;
use crate::Result;

/// Terminal pipeline kind after feature routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Voice-enhanced audio track.
    Enhance,
    /// Romanized subtitles.
    Translit,
    /// Condensed audio.
    Condense,
    /// Subtitles transcribed from the dub.
    Subs2Dubs,
    /// Flash-card media.
    Subs2Cards,
}

impl Mode {
    /// Stable name used in events and the importance table.
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Enhance => "Enhance",
            Mode::Translit => "Translit",
            Mode::Condense => "Condense",
            Mode::Subs2Dubs => "Subs2Dubs",
            Mode::Subs2Cards => "Subs2Cards",
        }
    }

    /// Parse the name used in the importance table.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Enhance" => Some(Mode::Enhance),
            "Translit" => Some(Mode::Translit),
            "Condense" => Some(Mode::Condense),
            "Subs2Dubs" => Some(Mode::Subs2Dubs),
            "Subs2Cards" => Some(Mode::Subs2Cards),
            _ => None,
        }
    }
}

/// Which engines a task will exercise. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureSet {
    pub enhance: bool,
    pub translit: bool,
    pub condense: bool,
    pub stt: bool,
}

/// Context bundle handed down to every stage of a task.
///
/// Carries the cancellation scope and the progress reporter so no stage
/// reaches for process globals.
#[derive(Clone)]
pub struct TaskContext {
    /// Cancellation scope rooted at `CancelProcessing`.
    pub cancel: CancellationToken,
    /// Per-task progress reporter with the task's importance map.
    pub reporter: ProgressReporter,
}

impl TaskContext {
    /// Create a context from its parts.
    pub fn new(cancel: CancellationToken, reporter: ProgressReporter) -> Self {
        Self { cancel, reporter }
    }

    /// Bail out if the task scope was cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(LangkitError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventHub, EventSink, EventThrottler};
    use crate::progress::compute_importance_map;
    use std::sync::Arc;

    #[test]
    fn test_mode_name_roundtrip() {
        for mode in [
            Mode::Enhance,
            Mode::Translit,
            Mode::Condense,
            Mode::Subs2Dubs,
            Mode::Subs2Cards,
        ] {
            assert_eq!(Mode::parse(mode.name()), Some(mode));
        }
        assert_eq!(Mode::parse("Nope"), None);
    }

    #[tokio::test]
    async fn test_context_cancellation_check() {
        let hub = Arc::new(EventHub::new(8));
        let throttler = Arc::new(EventThrottler::new(hub as Arc<dyn EventSink>));
        let map = compute_importance_map(Mode::Enhance, false, &FeatureSet::default());
        let ctx = TaskContext::new(
            CancellationToken::new(),
            ProgressReporter::new(throttler, map),
        );
        assert!(ctx.check_cancelled().is_ok());
        ctx.cancel.cancel();
        assert!(ctx.check_cancelled().unwrap_err().is_cancelled());
    }
}
