//! # documark
//!
//! Convert documents (PDF, DOCX, images, plain text) to Markdown using
//! multimodal language models.
//!
//! Each page is rasterised (or read as text) and handed to a model that
//! answers with a structured JSON reply carrying the Markdown. Results are
//! written next to the source or under an output pattern, and every
//! successful conversion is recorded so unchanged files are skipped on the
//! next run.
//!
//! ## Pipeline Overview
//!
//! ```text
//! inputs
//!  │
//!  ├─ 1. Walk     expand directories, filter by supported extension
//!  ├─ 2. Batch    bounded concurrency, abort on configuration errors
//!  │
//!  │   per file:
//!  ├─ 3. Pending  hash, compare against the metadata store, maybe skip
//!  ├─ 4. Render   pdfium / soffice / image / text → ordered units
//!  ├─ 5. Convert  encode, call the model, validate, retry, clean up
//!  └─ 6. Write    resolve output pattern, atomic write, upsert record
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use documark::{
//!     collect_sources, BatchCoordinator, ConversionConfig, Converter, EdgequakeProvider,
//!     MetadataStore, ProviderConfig, SourceFilter,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         .model("gemini/gemini-2.5-flash")
//!         .pattern("markdown/{relative_dir}/{stem}.md")
//!         .concurrency(4)
//!         .build()?;
//!
//!     let provider = Arc::new(EdgequakeProvider::new(ProviderConfig::from_env()));
//!     let store = Arc::new(MetadataStore::open(&config.metadata_path));
//!     let batch = BatchCoordinator::new(Converter::new(config, provider, store)?);
//!
//!     let sources = collect_sources(&["docs"], true, &SourceFilter::default())?;
//!     let report = batch.run(sources).await?;
//!     eprintln!("{} done, {} skipped, {} failed",
//!         report.summary.done, report.summary.skipped, report.summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `documark` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! documark = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod metadata;
pub mod output;
pub mod pattern;
pub mod pipeline;
pub mod processor;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod source;
pub mod walk;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchCoordinator, CancellationHandle, ResultStream};
pub use config::{ConversionConfig, ConversionConfigBuilder, ProviderConfig};
pub use convert::{ConversionRequest, ConversionState, Converter};
pub use error::{ConversionError, DocumarkError, ErrorKind, PatternError, ProviderError};
pub use metadata::{ConversionRecord, MetadataStore, RecordStatus};
pub use output::{BatchReport, BatchSummary, ConversionResult, ConversionStatus};
pub use pattern::{OutputPattern, PatternVars};
pub use pipeline::render::RenderedUnit;
pub use pipeline::retry::RetryPolicy;
pub use processor::{supported_extensions, Processor};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use provider::{EdgequakeProvider, ModelProvider, ModelRequest};
pub use source::SourceDocument;
pub use walk::{collect_sources, SourceFilter};
