//! Progress-callback trait for per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the batch coordinator dispatches and finishes each file.
//!
//! Callbacks rather than channels: the host can forward events to a progress
//! bar, a log, or a channel of its own without the library knowing how it
//! communicates. The trait is `Send + Sync` because files complete
//! concurrently.
//!
//! # Example
//!
//! ```rust
//! use documark::{BatchProgressCallback, ConversionConfig, ConversionResult};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl BatchProgressCallback for Counter {
//!     fn on_file_complete(&self, _result: &ConversionResult) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{BatchSummary, ConversionResult};
use std::path::Path;
use std::sync::Arc;

/// Called by the batch coordinator as it processes each file.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_file_start` and `on_file_complete` may be
/// called concurrently from different tasks.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any file is dispatched.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file leaves the queue and its conversion begins.
    fn on_file_start(&self, path: &Path) {
        let _ = path;
    }

    /// Called with the final result of each dispatched file.
    fn on_file_complete(&self, result: &ConversionResult) {
        let _ = result;
    }

    /// Called once after every dispatched file has finished.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
