//! Per-file results and batch aggregates.

use crate::error::{ConversionError, DocumarkError, ErrorKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Terminal state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Done,
    Skipped,
    Failed,
}

/// Outcome of converting one source. Produced exactly once per dispatched
/// file and never modified afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub source: PathBuf,
    /// Where the Markdown was (or, for skips, previously was) written.
    pub output_path: Option<PathBuf>,
    /// Length in bytes of the Markdown written; 0 for skips and failures.
    pub markdown_len: usize,
    pub success: bool,
    pub status: ConversionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ConversionError>,
    pub duration_ms: u64,
    pub model: String,
}

impl ConversionResult {
    pub fn done(source: PathBuf, output_path: PathBuf, markdown_len: usize, model: String) -> Self {
        Self {
            source,
            output_path: Some(output_path),
            markdown_len,
            success: true,
            status: ConversionStatus::Done,
            error: None,
            duration_ms: 0,
            model,
        }
    }

    pub fn skipped(source: PathBuf, output_path: PathBuf, model: String) -> Self {
        Self {
            source,
            output_path: Some(output_path),
            markdown_len: 0,
            success: true,
            status: ConversionStatus::Skipped,
            error: None,
            duration_ms: 0,
            model,
        }
    }

    pub fn failed(source: PathBuf, error: ConversionError, model: String) -> Self {
        Self {
            source,
            output_path: None,
            markdown_len: 0,
            success: false,
            status: ConversionStatus::Failed,
            error: Some(error),
            duration_ms: 0,
            model,
        }
    }

    pub(crate) fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(ConversionError::kind)
    }
}

/// DONE / SKIPPED / FAILED counts for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Files found and queued.
    pub total: usize,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Queued files never started because the batch was aborted or cancelled.
    pub abandoned: usize,
    pub failures_by_kind: BTreeMap<String, usize>,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn from_results(total: usize, results: &[ConversionResult], duration_ms: u64) -> Self {
        let mut summary = Self {
            total,
            duration_ms,
            ..Self::default()
        };
        for r in results {
            match r.status {
                ConversionStatus::Done => summary.done += 1,
                ConversionStatus::Skipped => summary.skipped += 1,
                ConversionStatus::Failed => summary.failed += 1,
            }
            if let Some(kind) = r.error_kind() {
                *summary.failures_by_kind.entry(kind.to_string()).or_default() += 1;
            }
        }
        summary.abandoned = total.saturating_sub(results.len());
        summary
    }

    pub fn processed(&self) -> usize {
        self.done + self.skipped + self.failed
    }
}

/// Everything a batch run produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// In completion order.
    pub results: Vec<ConversionResult>,
    pub summary: BatchSummary,
    /// The configuration-class error that stopped dispatch, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<ConversionError>,
    /// Whether a [`crate::batch::CancellationHandle`] stopped the batch.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// `Ok(self)` when nothing failed; otherwise the most specific error.
    pub fn into_result(self) -> Result<Self, DocumarkError> {
        if let Some(cause) = self.aborted {
            return Err(DocumarkError::BatchAborted {
                completed: self.results.len(),
                cause,
            });
        }
        if self.summary.failed > 0 {
            return Err(DocumarkError::PartialFailure {
                failed: self.summary.failed,
                total: self.summary.processed(),
            });
        }
        Ok(self)
    }
}
