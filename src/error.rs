//! Error types for the documark library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DocumarkError`] — **Fatal**: the run cannot proceed at all (bad
//!   output pattern, invalid configuration, missing input, a provider that
//!   rejects our credentials). Returned as `Err(DocumarkError)` from the
//!   configuration and batch-level entry points.
//!
//! * [`ConversionError`] — **Per-file**: one document failed (unsupported
//!   extension, corrupt PDF, model returned garbage) but every other file is
//!   fine. Stored inside [`crate::output::ConversionResult`] so a batch keeps
//!   going and reports the failure in its summary.
//!
//! Two per-file kinds are *configuration-class*: [`ConversionError::FatalProvider`]
//! and [`ConversionError::Pattern`]. They would fail identically for every
//! remaining file, so the batch coordinator stops dispatching new work when
//! it sees one (see [`ConversionError::aborts_batch`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the documark library.
#[derive(Debug, Error)]
pub enum DocumarkError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// An input path given on the command line does not exist.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Walking a directory tree failed part-way.
    #[error("Failed to scan '{path}': {detail}")]
    WalkFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The output pattern is malformed. Detected before any file work.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    // ── Batch errors ──────────────────────────────────────────────────────
    /// A configuration-class failure stopped the batch early.
    ///
    /// Files already in flight were allowed to finish; queued files were
    /// abandoned.
    #[error("Batch aborted after {completed} file(s): {cause}")]
    BatchAborted {
        completed: usize,
        cause: ConversionError,
    },

    /// At least one file failed. Returned by
    /// [`crate::output::BatchReport::into_result`].
    #[error("{failed}/{total} files failed during conversion")]
    PartialFailure { failed: usize, total: usize },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A malformed or unresolvable output pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PatternError {
    #[error("Output pattern is empty")]
    Empty,

    #[error("Unknown variable '{{{name}}}' in pattern '{pattern}'. Valid variables: {valid}")]
    UnknownVariable {
        pattern: String,
        name: String,
        valid: String,
    },

    #[error("Unbalanced '{brace}' at byte {position} in pattern '{pattern}' (use '{brace}{brace}' for a literal brace)")]
    UnbalancedBrace {
        pattern: String,
        brace: char,
        position: usize,
    },

    /// A variable the pattern references has no value for this file.
    #[error("Variable '{{{name}}}' has no value for this file")]
    MissingValue { name: String },
}

/// Coarse classification of a [`ConversionError`], used for summary tables
/// and tests that care about the category rather than the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    RenderFailure,
    ModelOutput,
    TransientProvider,
    FatalProvider,
    Pattern,
    OutputWrite,
    SourceUnreadable,
    MetadataStore,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UnsupportedFormat => "unsupported format",
            ErrorKind::RenderFailure => "render failure",
            ErrorKind::ModelOutput => "invalid model output",
            ErrorKind::TransientProvider => "provider unavailable",
            ErrorKind::FatalProvider => "provider rejected request",
            ErrorKind::Pattern => "output pattern",
            ErrorKind::OutputWrite => "output write",
            ErrorKind::SourceUnreadable => "source unreadable",
            ErrorKind::MetadataStore => "metadata store",
        };
        f.write_str(s)
    }
}

/// A non-fatal error for a single file.
///
/// Stored inside [`crate::output::ConversionResult`] when a conversion
/// fails. The batch continues unless [`aborts_batch`](Self::aborts_batch)
/// is true.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionError {
    /// No processor is registered for this extension. Never retried.
    #[error("Unsupported file type '.{extension}' for '{path}'. Supported: {supported}")]
    UnsupportedFormat {
        path: PathBuf,
        extension: String,
        supported: String,
    },

    /// The document is corrupt, unreadable, or could not be rasterised.
    #[error("Failed to render '{path}': {detail}")]
    RenderFailure { path: PathBuf, detail: String },

    /// The model reply did not match the response schema, on every attempt.
    #[error("Model returned invalid output after {attempts} attempt(s): {detail}")]
    ModelOutput { attempts: u32, detail: String },

    /// Network / rate-limit / timeout failure that outlasted the retry budget.
    #[error("Provider unavailable after {attempts} attempt(s): {detail}")]
    TransientProvider { attempts: u32, detail: String },

    /// Authentication, unknown model, or other misconfiguration. Not retried.
    #[error("Provider rejected the request: {detail}")]
    FatalProvider { detail: String },

    /// The output pattern could not be resolved for this file.
    #[error("Output pattern error: {detail}")]
    Pattern { detail: String },

    /// Creating the output directory or writing the Markdown failed.
    #[error("Failed to write output file '{path}': {detail}")]
    OutputWrite { path: PathBuf, detail: String },

    /// The source could not be read (hashing or stat failed).
    #[error("Cannot read source '{path}': {detail}")]
    SourceUnreadable { path: PathBuf, detail: String },

    /// Persisting the conversion record failed.
    #[error("Failed to update metadata store '{path}': {detail}")]
    MetadataStore { path: PathBuf, detail: String },
}

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            ConversionError::RenderFailure { .. } => ErrorKind::RenderFailure,
            ConversionError::ModelOutput { .. } => ErrorKind::ModelOutput,
            ConversionError::TransientProvider { .. } => ErrorKind::TransientProvider,
            ConversionError::FatalProvider { .. } => ErrorKind::FatalProvider,
            ConversionError::Pattern { .. } => ErrorKind::Pattern,
            ConversionError::OutputWrite { .. } => ErrorKind::OutputWrite,
            ConversionError::SourceUnreadable { .. } => ErrorKind::SourceUnreadable,
            ConversionError::MetadataStore { .. } => ErrorKind::MetadataStore,
        }
    }

    /// Configuration-class failures that would repeat for every file.
    pub fn aborts_batch(&self) -> bool {
        matches!(
            self,
            ConversionError::FatalProvider { .. } | ConversionError::Pattern { .. }
        )
    }

    pub(crate) fn render(path: impl Into<PathBuf>, detail: impl fmt::Display) -> Self {
        ConversionError::RenderFailure {
            path: path.into(),
            detail: detail.to_string(),
        }
    }

    /// Fill in the source path of a render failure raised without one.
    pub(crate) fn with_path(self, source: &std::path::Path) -> Self {
        match self {
            ConversionError::RenderFailure { path, detail } if path.as_os_str().is_empty() => {
                ConversionError::RenderFailure {
                    path: source.to_path_buf(),
                    detail,
                }
            }
            other => other,
        }
    }
}

impl From<PatternError> for ConversionError {
    fn from(e: PatternError) -> Self {
        ConversionError::Pattern {
            detail: e.to_string(),
        }
    }
}

/// Classified failure returned by a [`crate::provider::ModelProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Worth retrying: timeouts, rate limits, connection resets, 5xx.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Not worth retrying: bad credentials, unknown model, malformed request.
    #[error("fatal provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Transient(m) | ProviderError::Fatal(m) => m,
        }
    }
}
