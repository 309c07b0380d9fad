//! End-to-end pipeline tests with a scripted model provider.
//!
//! Inputs are real files generated on the fly (PNG via the `image` crate,
//! plain text, and a PDF built with pdfium). No network access is needed.
//! The PDF scenario needs a loadable pdfium library and prints `SKIP`
//! otherwise.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use documark::pipeline::render::bind_pdfium;
use documark::pipeline::retry::RetryPolicy;
use documark::provider::{parse_model_id, PageContent};
use documark::{
    collect_sources, BatchCoordinator, BatchProgressCallback, ConversionConfig, ConversionResult,
    ConversionStatus, Converter, DocumarkError, ErrorKind, MetadataStore, ModelProvider,
    ModelRequest, OutputPattern, PatternVars, ProviderError, SourceFilter,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Scripted provider ────────────────────────────────────────────────────────

/// Records every request and tracks how many calls overlap.
///
/// Model names select behaviour: `openai/garbage` replies with non-JSON,
/// anything `parse_model_id` rejects is a fatal error, everything else
/// echoes the page numbers it was given.
#[derive(Default)]
struct ScriptedProvider {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    page_orders: Mutex<Vec<Vec<usize>>>,
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        parse_model_id(&request.model, "gemini")?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let pages: Vec<usize> = request.pages.iter().map(|p| p.page).collect();
        self.page_orders.lock().unwrap().push(pages.clone());

        if request.model.ends_with("/garbage") {
            return Ok("Sure! Here is your document.".to_string());
        }

        let body: Vec<String> = request
            .pages
            .iter()
            .map(|p| match &p.content {
                PageContent::Image(img) => format!("page {} image {}x{}", p.page, img.width, img.height),
                PageContent::Text(t) => format!("page {} text {}", p.page, t.trim()),
            })
            .collect();
        Ok(serde_json::json!({ "markdown_content": format!("# Doc\n\n{}", body.join("\n\n")) }).to_string())
    }
}

#[derive(Default)]
struct CountingCallback {
    started: AtomicUsize,
    completed: AtomicUsize,
    batch_total: AtomicUsize,
}

impl BatchProgressCallback for CountingCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.batch_total.store(total_files, Ordering::SeqCst);
    }
    fn on_file_start(&self, _path: &Path) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_complete(&self, _result: &ConversionResult) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn write_png(path: &Path, shade: u8) {
    image::RgbImage::from_pixel(16, 12, image::Rgb([shade, 128, 255 - shade]))
        .save(path)
        .unwrap();
}

/// 4 PNGs, 4 text files, and 2 files no processor accepts.
fn mixed_inputs(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for i in 0..4 {
        let p = dir.join(format!("scan{i}.png"));
        write_png(&p, i as u8 * 40);
        files.push(p);
    }
    for i in 0..4 {
        let p = dir.join(format!("note{i}.txt"));
        std::fs::write(&p, format!("note {i}")).unwrap();
        files.push(p);
    }
    for name in ["data.xyz", "blob.bin"] {
        let p = dir.join(name);
        std::fs::write(&p, [0u8, 1, 2, 3]).unwrap();
        files.push(p);
    }
    files
}

fn batch(
    tmp: &TempDir,
    provider: Arc<ScriptedProvider>,
    configure: impl FnOnce(documark::ConversionConfigBuilder) -> documark::ConversionConfigBuilder,
) -> BatchCoordinator {
    let builder = ConversionConfig::builder()
        .base_dir(tmp.path())
        .metadata_path(tmp.path().join(".documark_cache/records.json"))
        .retry(RetryPolicy::immediate(2))
        .max_output_attempts(2);
    let config = configure(builder).build().unwrap();
    let store = Arc::new(MetadataStore::open(&config.metadata_path));
    BatchCoordinator::new(Converter::new(config, provider, store).unwrap())
}

// ── Batch scenarios ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mixed_batch_respects_concurrency_bound() {
    let tmp = TempDir::new().unwrap();
    let inputs = mixed_inputs(tmp.path());
    let provider = Arc::new(ScriptedProvider::default());
    let callback = Arc::new(CountingCallback::default());
    let cb = Arc::clone(&callback);
    let batch = batch(&tmp, provider.clone(), |b| {
        b.concurrency(4)
            .output_dir(tmp.path().join("out"))
            .progress_callback(cb)
    });

    let report = batch.run(inputs).await.unwrap();

    assert_eq!(report.results.len(), 10);
    assert_eq!(report.summary.done, 8);
    assert_eq!(report.summary.failed, 2);
    assert!(report.aborted.is_none());
    for r in report.failures() {
        assert_eq!(r.error_kind(), Some(ErrorKind::UnsupportedFormat));
    }

    assert_eq!(provider.calls.load(Ordering::SeqCst), 8);
    let max = provider.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 4, "at most 4 model calls may overlap, saw {max}");
    assert!(max >= 2, "files should convert concurrently, saw {max}");

    assert_eq!(callback.batch_total.load(Ordering::SeqCst), 10);
    assert_eq!(callback.started.load(Ordering::SeqCst), 10);
    assert_eq!(callback.completed.load(Ordering::SeqCst), 10);

    let md = std::fs::read_to_string(tmp.path().join("out/scan0.md")).unwrap();
    assert!(md.starts_with("# Doc"), "got: {md}");
    assert!(md.contains("page 1 image 16x12"), "got: {md}");
    assert!(md.ends_with('\n'));

    assert!(matches!(
        report.into_result(),
        Err(DocumarkError::PartialFailure { failed: 2, total: 10 })
    ));
}

#[tokio::test]
async fn test_second_run_skips_unchanged_files() {
    let tmp = TempDir::new().unwrap();
    let inputs = mixed_inputs(tmp.path());
    let provider = Arc::new(ScriptedProvider::default());

    let first = batch(&tmp, provider.clone(), |b| b.concurrency(3))
        .run(inputs.clone())
        .await
        .unwrap();
    assert_eq!(first.summary.done, 8);

    let second = batch(&tmp, provider.clone(), |b| b.concurrency(3))
        .run(inputs.clone())
        .await
        .unwrap();
    assert_eq!(second.summary.skipped, 8);
    assert_eq!(second.summary.done, 0);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 8, "skips must not call the model");

    // Skipped results point at the previous output.
    let skipped = second
        .results
        .iter()
        .find(|r| r.source.ends_with("note1.txt"))
        .unwrap();
    assert_eq!(skipped.status, ConversionStatus::Skipped);
    assert!(skipped.output_path.as_ref().unwrap().ends_with("note1.md"));

    // Editing one file converts only that file.
    std::fs::write(tmp.path().join("note1.txt"), "edited").unwrap();
    let third = batch(&tmp, provider.clone(), |b| b.concurrency(3))
        .run(inputs.clone())
        .await
        .unwrap();
    assert_eq!((third.summary.done, third.summary.skipped), (1, 7));

    // --force converts everything again.
    let forced = batch(&tmp, provider.clone(), |b| b.force(true))
        .run(inputs)
        .await
        .unwrap();
    assert_eq!(forced.summary.done, 8);
}

#[tokio::test]
async fn test_metadata_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let inputs = mixed_inputs(tmp.path());
    let provider = Arc::new(ScriptedProvider::default());
    batch(&tmp, provider, |b| b).run(inputs).await.unwrap();

    let store = MetadataStore::open(tmp.path().join(".documark_cache/records.json"));
    assert_eq!(store.len(), 8);
    let scan = tmp.path().join("scan2.png").canonicalize().unwrap();
    let record = store.lookup(&scan).expect("record for scan2.png");
    assert_eq!(record.content_hash, documark::source::hash_file(&scan).unwrap());
    assert_eq!(record.model, documark::config::DEFAULT_MODEL);
    assert!(record.output_path.exists());
}

#[tokio::test]
async fn test_invalid_model_aborts_batch() {
    let tmp = TempDir::new().unwrap();
    let inputs = mixed_inputs(tmp.path());
    let provider = Arc::new(ScriptedProvider::default());
    let batch = batch(&tmp, provider.clone(), |b| b.concurrency(1).model("nosuch/model-x"));

    let report = batch.run(inputs[..4].to_vec()).await.unwrap();

    let cause = report.aborted.clone().expect("batch should abort");
    assert_eq!(cause.kind(), ErrorKind::FatalProvider);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.summary.abandoned, 3);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1, "fatal errors are not retried");
}

#[tokio::test]
async fn test_unusable_reply_fails_file_but_not_batch() {
    let tmp = TempDir::new().unwrap();
    let inputs = mixed_inputs(tmp.path());
    let provider = Arc::new(ScriptedProvider::default());
    let batch = batch(&tmp, provider.clone(), |b| b.concurrency(2).model("openai/garbage"));

    let report = batch.run(inputs[4..8].to_vec()).await.unwrap();

    assert!(report.aborted.is_none());
    assert_eq!(report.summary.failed, 4);
    for r in &report.results {
        assert_eq!(r.error_kind(), Some(ErrorKind::ModelOutput));
    }
    // Two output attempts per file.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn test_relative_dir_pattern_mirrors_tree() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    std::fs::create_dir_all(root.join("docs/a/b")).unwrap();
    std::fs::write(root.join("docs/top.txt"), "top").unwrap();
    std::fs::write(root.join("docs/a/b/deep.txt"), "deep").unwrap();
    write_png(&root.join("docs/a/pic.png"), 7);

    let sources = collect_sources(&[root.join("docs")], true, &SourceFilter::default()).unwrap();
    assert_eq!(sources.len(), 3);

    let provider = Arc::new(ScriptedProvider::default());
    let report = batch(&tmp, provider, |b| b.pattern("md/{relative_dir}/{stem}.md"))
        .run(sources)
        .await
        .unwrap();
    assert_eq!(report.summary.done, 3, "{:?}", report.failures().collect::<Vec<_>>());

    let root = root.canonicalize().unwrap();
    assert!(root.join("md/docs/top.md").exists());
    assert!(root.join("md/docs/a/pic.md").exists());
    assert!(root.join("md/docs/a/b/deep.md").exists());
}

#[test]
fn test_pattern_resolution_is_deterministic() {
    let pattern = OutputPattern::parse("out/{relative_dir}/{stem}-{date}.{ext}.md").unwrap();
    let vars = PatternVars::new()
        .set("relative_dir", "reports/2024")
        .set("stem", "q1")
        .set("ext", "pdf")
        .set("date", "2024-05-01");
    let a = pattern.resolve(&vars).unwrap();
    let b = pattern.resolve(&vars).unwrap();
    assert_eq!(a, b);
    assert_eq!(a, PathBuf::from("out/reports/2024/q1-2024-05-01.pdf.md"));
}

// ── Page order ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_text_pages_reach_model_in_order() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("book.txt");
    std::fs::write(&src, "one\u{000C}two\u{000C}three").unwrap();
    let provider = Arc::new(ScriptedProvider::default());

    let report = batch(&tmp, provider.clone(), |b| b).run(vec![src]).await.unwrap();
    assert_eq!(report.summary.done, 1);
    assert_eq!(*provider.page_orders.lock().unwrap(), vec![vec![1, 2, 3]]);

    let md = std::fs::read_to_string(tmp.path().join("book.md")).unwrap();
    let one = md.find("text one").unwrap();
    let three = md.find("text three").unwrap();
    assert!(one < three);
}

#[tokio::test]
async fn test_pdf_pages_reach_model_in_order() {
    let pdfium = match bind_pdfium(None) {
        Ok(p) => p,
        Err(e) => {
            println!("SKIP — {e}");
            return;
        }
    };

    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("three.pdf");
    {
        use pdfium_render::prelude::*;
        let mut doc = pdfium.create_new_pdf().unwrap();
        for _ in 0..3 {
            doc.pages_mut()
                .create_page_at_end(PdfPagePaperSize::a4())
                .unwrap();
        }
        doc.save_to_file(&src).unwrap();
    }
    drop(pdfium);

    let provider = Arc::new(ScriptedProvider::default());
    let report = batch(&tmp, provider.clone(), |b| b.dpi(72))
        .run(vec![src])
        .await
        .unwrap();

    assert_eq!(report.summary.done, 1, "{:?}", report.failures().collect::<Vec<_>>());
    assert_eq!(*provider.page_orders.lock().unwrap(), vec![vec![1, 2, 3]]);
    let md = std::fs::read_to_string(tmp.path().join("three.md")).unwrap();
    assert!(md.contains("page 3 image"), "got: {md}");
}
