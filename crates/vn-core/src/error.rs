//! Unified error type for vidnorm.
//!
//! Every crate funnels failures into [`Error`]. Each variant carries enough
//! context (file path, stage, underlying message) for a batch caller to log
//! the failure and move on to the next file.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Unified error type covering all failure modes in vidnorm.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller-supplied data or configuration failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) failed to spawn or exited non-zero.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An external tool exceeded its execution time limit and was killed.
    #[error("Tool error [{tool}]: timed out after {after:?}")]
    Timeout {
        /// Name of the tool that was killed.
        tool: String,
        /// The limit that was exceeded.
        after: Duration,
    },

    /// An external tool was killed because its job was cancelled.
    #[error("Tool error [{tool}]: cancelled")]
    Cancelled {
        /// Name of the tool that was killed.
        tool: String,
    },

    /// The input could not be read or contains no decodable streams.
    #[error("Probe error [{}]: {message}", path.display())]
    Probe {
        /// The file being probed.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Lossless repackaging could not be performed.
    ///
    /// This is the only recoverable failure: the pipeline escalates to a full
    /// conversion when it sees it.
    #[error("Remux error [{}]: {message}", path.display())]
    Remux {
        /// The source file.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Re-encoding failed (after the allowed retry).
    #[error("Transcode error [{}]: {message}", path.display())]
    Transcode {
        /// The source file.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// The produced file does not satisfy the target contract.
    #[error("Verify error [{}]: {message}", path.display())]
    Verify {
        /// The source file whose output failed verification.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// A caller-supplied per-job deadline expired.
    #[error("Deadline exceeded [{}]: job aborted after {after:?}", path.display())]
    DeadlineExceeded {
        /// The source file.
        path: PathBuf,
        /// The deadline that expired.
        after: Duration,
    },

    /// A pipeline step failed outside the stage-specific variants.
    #[error("Pipeline error [{step}]: {message}")]
    Pipeline {
        /// The pipeline step that failed.
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Name of the pipeline stage this error belongs to, for logging.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validate",
            Error::Io { .. } => "io",
            Error::Tool { .. } | Error::Timeout { .. } | Error::Cancelled { .. } => "tool",
            Error::Probe { .. } => "probe",
            Error::Remux { .. } => "remux",
            Error::Transcode { .. } => "transcode",
            Error::Verify { .. } => "verify",
            Error::DeadlineExceeded { .. } => "deadline",
            Error::Pipeline { .. } => "pipeline",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether a failed engine run may be retried once.
    ///
    /// Only crashed or non-zero-exit tool runs qualify. Timeouts and
    /// cancellations are caller-driven and never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Tool { .. })
    }

    /// Whether the pipeline recovers from this error locally (remux fallback).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Remux { .. })
    }

    /// Whether this error was caused by cancellation or an expired deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. } | Error::DeadlineExceeded { .. })
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Probe`].
    pub fn probe(path: &Path, message: impl Into<String>) -> Self {
        Error::Probe {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Remux`].
    pub fn remux(path: &Path, message: impl Into<String>) -> Self {
        Error::Remux {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Transcode`].
    pub fn transcode(path: &Path, message: impl Into<String>) -> Self {
        Error::Transcode {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Verify`].
    pub fn verify(path: &Path, message: impl Into<String>) -> Self {
        Error::Verify {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Pipeline`].
    pub fn pipeline(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Pipeline {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
