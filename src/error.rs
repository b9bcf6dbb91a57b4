//! Error types for the langkit processing engine.
//!
//! This module defines the `LangkitError` enum covering all error conditions
//! that can occur during media processing, voice separation, transcription,
//! container management and model downloads.
//!
//! Every variant carries enough context for user-facing reporting, and
//! [`LangkitError::class`] partitions errors into the retry classes the
//! retry policy and the task engine act on.
use std::path::PathBuf;

use thiserror::Error;

/// Represents all possible errors in the langkit core.
///
/// # Examples
///
/// ```rust
/// use langkit::error::{LangkitError, LangkitResult};
///
/// fn example() -> LangkitResult<()> {
///     Err(LangkitError::validation("missing target language"))
/// }
/// ```
#[derive(Error, Debug)]
pub enum LangkitError {
    /// I/O operation failed during file system access.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error due to invalid or missing settings.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error
        message: String,
    },

    /// The request itself was malformed: unknown feature, missing language,
    /// wrongly-typed option value.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what was rejected
        message: String,
    },

    /// A provider or model was requested that is not usable right now
    /// (missing credential, unknown name).
    #[error("Provider unavailable [{name}]: {message}")]
    ProviderUnavailable {
        /// Provider or model name as requested
        name: String,
        /// Why it cannot be used
        message: String,
    },

    /// Transient failure: network, HTTP 5xx, tool crash with a
    /// non-cancellation cause. Eligible for retry.
    #[error("Transient error: {message}")]
    Transient {
        /// Description of the transient failure
        message: String,
    },

    /// A model weight download failed or produced a corrupt file.
    ///
    /// Kept as its own variant so the retry layer can attach a
    /// `DownloadExpectation` and wipe partial files between attempts.
    #[error("Model download failed [{model}]: {message}")]
    ModelDownloadFailed {
        /// Model whose weights were being fetched
        model: String,
        /// Underlying failure
        message: String,
    },

    /// The separator ran out of GPU memory.
    #[error(
        "GPU out of memory while separating audio. Lower the maximum segment length in the voice enhancing options and try again."
    )]
    CudaOutOfMemory,

    /// The GPU container runtime is not usable on this host.
    #[error("GPU runtime unavailable: {hint}")]
    GpuUnavailable {
        /// OS-specific remediation hint
        hint: String,
    },

    /// Container lifecycle or exec failure.
    #[error("Container error: {message}")]
    Container {
        /// Description of the container failure
        message: String,
    },

    /// ffmpeg / ffprobe / mediainfo invocation failure.
    #[error("Media tool error: {message}")]
    Media {
        /// Description of the media tool failure
        message: String,
    },

    /// Subtitle parse or serialization failure.
    #[error("Subtitle error [{format}]: {message}")]
    Subtitle {
        /// Subtitle format involved (e.g. "SRT")
        format: String,
        /// Detailed error message
        message: String,
    },

    /// The specified path does not exist on the filesystem.
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// The operation was cancelled through the task scope.
    #[error("context canceled")]
    Cancelled,

    /// Catch-all error variant wrapping any other failure.
    #[error("Unknown error: {0}")]
    Other(#[from] anyhow::Error),
}

/// How the retry policy and the task engine should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt after backoff.
    Retry,
    /// Stop immediately, bubble the error up (cancellation, OOM).
    Abort,
    /// Not retryable and not an interruption: surface to the caller as-is.
    Terminal,
}

// Convert reqwest errors to transient network failures
impl From<reqwest::Error> for LangkitError {
    fn from(err: reqwest::Error) -> Self {
        LangkitError::Transient {
            message: err.to_string(),
        }
    }
}

// Convert file exploration errors raised during bulk discovery
impl From<walkdir::Error> for LangkitError {
    fn from(err: walkdir::Error) -> Self {
        LangkitError::Media {
            message: err.to_string(),
        }
    }
}

// Convert config crate errors to configuration errors
impl From<config::ConfigError> for LangkitError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(path) => LangkitError::Config {
                message: format!("Configuration file not found: {}", path),
            },
            config::ConfigError::Message(msg) => LangkitError::Config { message: msg },
            _ => LangkitError::Config {
                message: format!("Configuration error: {}", err),
            },
        }
    }
}

impl From<serde_json::Error> for LangkitError {
    fn from(err: serde_json::Error) -> Self {
        LangkitError::Config {
            message: format!("JSON serialization/deserialization error: {}", err),
        }
    }
}

/// Specialized `Result` type for langkit operations.
pub type LangkitResult<T> = Result<T, LangkitError>;

impl LangkitError {
    /// Create a configuration error with the given message.
    pub fn config<S: Into<String>>(message: S) -> Self {
        LangkitError::Config {
            message: message.into(),
        }
    }

    /// Create a validation error with the given message.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        LangkitError::Validation {
            message: message.into(),
        }
    }

    /// Create a provider-unavailable error for the given provider name.
    pub fn provider_unavailable<S1, S2>(name: S1, message: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        LangkitError::ProviderUnavailable {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a transient error with the given message.
    pub fn transient<S: Into<String>>(message: S) -> Self {
        LangkitError::Transient {
            message: message.into(),
        }
    }

    /// Create a model-download error for the given model.
    pub fn model_download<S1, S2>(model: S1, message: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        LangkitError::ModelDownloadFailed {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Create a container error with the given message.
    pub fn container<S: Into<String>>(message: S) -> Self {
        LangkitError::Container {
            message: message.into(),
        }
    }

    /// Create a media tool error with the given message.
    pub fn media<S: Into<String>>(message: S) -> Self {
        LangkitError::Media {
            message: message.into(),
        }
    }

    /// Create a subtitle error for the given format and message.
    pub fn subtitle<S1, S2>(format: S1, message: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        LangkitError::Subtitle {
            format: format.into(),
            message: message.into(),
        }
    }

    /// Create a GPU-unavailable error with a hint appropriate for this OS.
    pub fn gpu_unavailable() -> Self {
        #[cfg(target_os = "linux")]
        let hint = "the NVIDIA container toolkit is not installed or not configured; install nvidia-container-toolkit and restart the Docker daemon";
        #[cfg(target_os = "windows")]
        let hint = "Docker Desktop could not reach the NVIDIA runtime; make sure the NVIDIA driver is installed and WSL2 GPU support is enabled";
        #[cfg(target_os = "macos")]
        let hint = "NVIDIA GPUs are not supported on macOS; switch voice separation to CPU mode";
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        let hint = "the NVIDIA container runtime is not available on this host";
        LangkitError::GpuUnavailable {
            hint: hint.to_string(),
        }
    }

    /// Classify this error for the retry policy.
    ///
    /// Cancellation and resource exhaustion always abort; credential and
    /// request problems are terminal; network-ish failures retry.
    pub fn class(&self) -> ErrorClass {
        match self {
            LangkitError::Cancelled | LangkitError::CudaOutOfMemory => ErrorClass::Abort,
            LangkitError::Transient { .. } | LangkitError::ModelDownloadFailed { .. } => {
                ErrorClass::Retry
            }
            LangkitError::Io(_) => ErrorClass::Retry,
            _ => ErrorClass::Terminal,
        }
    }

    /// Whether this error came from a cancelled scope.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LangkitError::Cancelled)
    }
}

// Unit test: LangkitError classification and helper methods
#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_error_creation() {
        let error = LangkitError::config("test config error");
        assert!(matches!(error, LangkitError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: test config error");
    }

    #[test]
    fn test_validation_error_creation() {
        let error = LangkitError::validation("unknown feature flag");
        assert!(matches!(error, LangkitError::Validation { .. }));
        assert!(error.to_string().contains("unknown feature flag"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: LangkitError = io_error.into();
        assert!(matches!(err, LangkitError::Io(_)));
    }

    #[test]
    fn test_cancellation_is_abort() {
        assert_eq!(LangkitError::Cancelled.class(), ErrorClass::Abort);
        assert_eq!(LangkitError::CudaOutOfMemory.class(), ErrorClass::Abort);
    }

    #[test]
    fn test_transient_and_download_are_retry() {
        assert_eq!(
            LangkitError::transient("connection reset").class(),
            ErrorClass::Retry
        );
        assert_eq!(
            LangkitError::model_download("htdemucs", "truncated body").class(),
            ErrorClass::Retry
        );
    }

    #[test]
    fn test_credential_and_validation_are_terminal() {
        assert_eq!(
            LangkitError::provider_unavailable("openai", "no API key").class(),
            ErrorClass::Terminal
        );
        assert_eq!(
            LangkitError::validation("bad option").class(),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn test_cancelled_message_matches_wire_phrase() {
        assert_eq!(LangkitError::Cancelled.to_string(), "context canceled");
    }

    #[test]
    fn test_oom_message_carries_remediation() {
        let msg = LangkitError::CudaOutOfMemory.to_string();
        assert!(msg.contains("GPU out of memory"));
        assert!(msg.contains("segment"));
    }
}
