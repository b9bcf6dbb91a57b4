//! Generic retry with exponential backoff, abort classes and cleanup hooks.
//!
//! Errors are classified through [`LangkitError::class`]: cancellation and
//! GPU exhaustion abort immediately, credential/validation problems are
//! terminal, everything network-shaped retries. The `on_retry` hook runs
//! after a failed attempt and before the backoff sleep, which is exactly
//! when a [`DownloadExpectation`] wipes partial files so the next attempt
//! starts clean.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::sleep;

use crate::error::{ErrorClass, LangkitError};
use crate::progress::ProgressReporter;
use crate::Result;

/// Retry configuration for network-backed operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (not retries).
    pub max_attempts: usize,
    /// Initial delay between attempts.
    pub base_delay: Duration,
    /// Ceiling on the backoff delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy with an explicit attempt ceiling and default backoff.
    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Run `operation` until it succeeds, aborts or exhausts attempts.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.run_with_hook(operation, |_, _| {}).await
    }

    /// Run `operation` with an `on_retry(attempt, err)` hook invoked before
    /// each backoff sleep. The last error is returned verbatim once the
    /// attempt ceiling is hit.
    pub async fn run_with_hook<T, F, Fut, H>(&self, mut operation: F, mut on_retry: H) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
        H: FnMut(usize, &LangkitError),
    {
        let mut last_error: Option<LangkitError> = None;

        for attempt in 0..self.max_attempts {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    match e.class() {
                        ErrorClass::Abort | ErrorClass::Terminal => return Err(e),
                        ErrorClass::Retry => {}
                    }
                    if attempt < self.max_attempts - 1 {
                        debug!("attempt {} failed, retrying: {}", attempt + 1, e);
                        on_retry(attempt + 1, &e);
                        sleep(self.delay_for(attempt)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| LangkitError::transient("retry loop ended without an attempt")))
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let millis = (self.base_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32)) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// What a model download attempt is expected to leave behind, and how to
/// undo it between attempts.
///
/// Attached to one retry policy run: `cleanup` removes the listed files and
/// progress bars, and must run iff the current attempt failed and another
/// attempt will start.
pub struct DownloadExpectation {
    /// Directory holding the model files.
    pub model_dir: PathBuf,
    /// File names expected inside `model_dir`.
    pub model_files: Vec<String>,
    /// Bars driven by this download.
    pub progress_bar_ids: Vec<String>,
    /// Reporter used to retract the bars.
    pub reporter: ProgressReporter,
}

impl DownloadExpectation {
    /// Remove the listed files (and any `.part` leftovers) and retract the
    /// progress bars so the next attempt starts from zero.
    pub fn cleanup(&self) {
        for name in &self.model_files {
            for candidate in [
                self.model_dir.join(name),
                self.model_dir.join(format!("{}.part", name)),
            ] {
                if candidate.exists() {
                    if let Err(e) = std::fs::remove_file(&candidate) {
                        warn!("failed to remove {} between attempts: {}", candidate.display(), e);
                    }
                }
            }
        }
        for bar_id in &self.progress_bar_ids {
            self.reporter.remove_bar(bar_id);
        }
    }
}
