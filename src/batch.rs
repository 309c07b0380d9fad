//! Bounded-concurrency batch coordination.
//!
//! Files are dispatched in input order through `buffer_unordered`, so at
//! most `concurrency` conversions are in flight and results arrive in
//! completion order. Two things stop dispatch early:
//!
//! * a [`CancellationHandle`] (Ctrl-C in the CLI), and
//! * a configuration-class failure ([`ConversionError::aborts_batch`]),
//!   which would repeat for every remaining file.
//!
//! Either way, files already in flight run to completion and queued files
//! are abandoned without a result.

use crate::convert::Converter;
use crate::error::{ConversionError, DocumarkError};
use crate::output::{BatchReport, BatchSummary, ConversionResult};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_stream::Stream;
use tracing::{info, warn};

/// A boxed stream of per-file results, in completion order.
pub type ResultStream = Pin<Box<dyn Stream<Item = ConversionResult> + Send>>;

/// Stops a running batch from dispatching further files.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct BatchState {
    abort: Mutex<Option<ConversionError>>,
}

impl BatchState {
    fn record_abort(&self, cause: &ConversionError) {
        let mut slot = self.abort.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(cause.clone());
        }
    }

    fn aborted(&self) -> bool {
        self.abort.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    fn take_abort(&self) -> Option<ConversionError> {
        self.abort.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

/// Runs a [`Converter`] over many files.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    converter: Converter,
    concurrency: usize,
    cancel: CancellationHandle,
}

impl BatchCoordinator {
    pub fn new(converter: Converter) -> Self {
        let concurrency = converter.config().concurrency.max(1);
        Self {
            converter,
            concurrency,
            cancel: CancellationHandle::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// A handle that stops dispatch when cancelled. Clones share state.
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancel.clone()
    }

    /// Stream results as files complete.
    ///
    /// Emits `on_batch_start` and the per-file callbacks; use
    /// [`run`](Self::run) to also get the summary and `on_batch_complete`.
    pub fn stream(&self, sources: Vec<PathBuf>) -> Result<ResultStream, DocumarkError> {
        self.check_sources(&sources)?;
        Ok(self.dispatch(sources, Arc::new(BatchState::default())))
    }

    /// Convert every source and collect a report.
    pub async fn run(&self, sources: Vec<PathBuf>) -> Result<BatchReport, DocumarkError> {
        self.check_sources(&sources)?;
        let start = Instant::now();
        let total = sources.len();
        info!(
            "Converting {} file(s) with {} worker(s), model {}",
            total,
            self.concurrency,
            self.converter.config().model
        );

        let state = Arc::new(BatchState::default());
        let results: Vec<ConversionResult> = self.dispatch(sources, Arc::clone(&state)).collect().await;

        let summary = BatchSummary::from_results(total, &results, start.elapsed().as_millis() as u64);
        self.callback().on_batch_complete(&summary);

        let aborted = state.take_abort();
        let cancelled = self.cancel.is_cancelled();
        if let Some(cause) = &aborted {
            warn!("Batch aborted, {} queued file(s) abandoned: {}", summary.abandoned, cause);
        } else if cancelled {
            warn!("Batch cancelled, {} queued file(s) abandoned", summary.abandoned);
        }
        info!(
            "Batch finished: {} done, {} skipped, {} failed in {}ms",
            summary.done, summary.skipped, summary.failed, summary.duration_ms
        );

        Ok(BatchReport {
            results,
            summary,
            aborted,
            cancelled,
        })
    }

    fn check_sources(&self, sources: &[PathBuf]) -> Result<(), DocumarkError> {
        if sources.len() > 1 && self.converter.config().output_file.is_some() {
            return Err(DocumarkError::InvalidConfig(format!(
                "an explicit output file only applies to a single input ({} given)",
                sources.len()
            )));
        }
        Ok(())
    }

    fn callback(&self) -> ProgressCallback {
        self.converter
            .config()
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback))
    }

    fn dispatch(&self, sources: Vec<PathBuf>, state: Arc<BatchState>) -> ResultStream {
        let callback = self.callback();
        callback.on_batch_start(sources.len());

        let converter = self.converter.clone();
        let cancel = self.cancel.clone();

        let s = stream::iter(sources.into_iter().map(move |path| {
            let converter = converter.clone();
            let cancel = cancel.clone();
            let state = Arc::clone(&state);
            let callback = Arc::clone(&callback);
            async move {
                // Checked when the slot opens, not when the file was queued.
                if cancel.is_cancelled() || state.aborted() {
                    return None;
                }
                callback.on_file_start(&path);
                let result = converter.convert_file(&path).await;
                if let Some(e) = result.error.as_ref().filter(|e| e.aborts_batch()) {
                    state.record_abort(e);
                }
                callback.on_file_complete(&result);
                Some(result)
            }
        }))
        .buffer_unordered(self.concurrency)
        .filter_map(|r| async move { r });

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionConfig;
    use crate::error::ProviderError;
    use crate::metadata::MetadataStore;
    use crate::provider::{ModelProvider, ModelRequest};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ModelProvider for Counting {
        async fn complete(&self, _request: &ModelRequest) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            if self.fail {
                return Err(ProviderError::Fatal("401 invalid api key".into()));
            }
            Ok(r#"{"markdown_content":"ok"}"#.to_string())
        }
    }

    fn coordinator(tmp: &TempDir, fail: bool, concurrency: usize) -> (BatchCoordinator, Arc<Counting>) {
        let provider = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail,
        });
        let config = ConversionConfig::builder()
            .concurrency(concurrency)
            .base_dir(tmp.path())
            .output_dir(tmp.path().join("out"))
            .metadata_path(tmp.path().join("records.json"))
            .build()
            .unwrap();
        let store = Arc::new(MetadataStore::open(&config.metadata_path));
        let converter = Converter::new(config, provider.clone(), store).unwrap();
        (BatchCoordinator::new(converter), provider)
    }

    fn inputs(tmp: &TempDir, n: usize) -> Vec<PathBuf> {
        (0..n)
            .map(|i| {
                let p = tmp.path().join(format!("f{i}.txt"));
                std::fs::write(&p, format!("file {i}")).unwrap();
                p
            })
            .collect()
    }

    #[tokio::test]
    async fn every_source_gets_exactly_one_result() {
        let tmp = TempDir::new().unwrap();
        let (batch, _) = coordinator(&tmp, false, 3);
        let report = batch.run(inputs(&tmp, 7)).await.unwrap();
        assert_eq!(report.results.len(), 7);
        assert_eq!(report.summary.done, 7);
        assert!(report.aborted.is_none());
    }

    #[tokio::test]
    async fn fatal_provider_error_stops_dispatch() {
        let tmp = TempDir::new().unwrap();
        let (batch, provider) = coordinator(&tmp, true, 1);
        let report = batch.run(inputs(&tmp, 5)).await.unwrap();

        assert!(report.aborted.is_some());
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.summary.abandoned, 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            report.into_result(),
            Err(DocumarkError::BatchAborted { completed: 1, .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_batch_dispatches_nothing() {
        let tmp = TempDir::new().unwrap();
        let (batch, provider) = coordinator(&tmp, false, 2);
        batch.cancellation_handle().cancel();
        let report = batch.run(inputs(&tmp, 3)).await.unwrap();
        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    /// Cancels the batch as soon as the first file starts.
    #[derive(Default)]
    struct CancelOnFirstStart {
        handle: Mutex<Option<CancellationHandle>>,
    }

    impl crate::progress::BatchProgressCallback for CancelOnFirstStart {
        fn on_file_start(&self, _path: &std::path::Path) {
            if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                handle.cancel();
            }
        }
    }

    #[tokio::test]
    async fn cancel_mid_batch_finishes_in_flight_and_abandons_queue() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let canceller = Arc::new(CancelOnFirstStart::default());
        let config = ConversionConfig::builder()
            .concurrency(1)
            .base_dir(tmp.path())
            .output_dir(tmp.path().join("out"))
            .metadata_path(tmp.path().join("records.json"))
            .progress_callback(canceller.clone())
            .build()
            .unwrap();
        let store = Arc::new(MetadataStore::open(&config.metadata_path));
        let batch = BatchCoordinator::new(Converter::new(config, provider.clone(), store).unwrap());
        *canceller.handle.lock().unwrap() = Some(batch.cancellation_handle());

        let report = batch.run(inputs(&tmp, 5)).await.unwrap();

        assert!(report.cancelled);
        assert!(report.aborted.is_none());
        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].success, "{:?}", report.results[0].error);
        assert_eq!(report.summary.abandoned, 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn output_file_rejects_multiple_inputs() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let config = ConversionConfig::builder()
            .output_file(tmp.path().join("one.md"))
            .metadata_path(tmp.path().join("records.json"))
            .build()
            .unwrap();
        let store = Arc::new(MetadataStore::open(&config.metadata_path));
        let batch = BatchCoordinator::new(Converter::new(config, provider, store).unwrap());
        let err = batch.run(inputs(&tmp, 2)).await.unwrap_err();
        assert!(matches!(err, DocumarkError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn stream_yields_results_as_they_complete() {
        let tmp = TempDir::new().unwrap();
        let (batch, _) = coordinator(&tmp, false, 2);
        let mut s = batch.stream(inputs(&tmp, 3)).unwrap();
        let mut n = 0;
        while let Some(r) = s.next().await {
            assert!(r.success, "{:?}", r.error);
            n += 1;
        }
        assert_eq!(n, 3);
    }
}
