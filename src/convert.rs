//! The per-file converter.
//!
//! Each file walks a small state machine:
//!
//! ```text
//! PENDING ──▶ SKIPPED
//!    │
//!    └──▶ RENDERING ──▶ CONVERTING ──▶ WRITING ──▶ DONE
//!             │              │             │
//!             └──────────────┴─────────────┴──▶ FAILED
//! ```
//!
//! [`Converter::convert`] never returns an error: every outcome, including
//! a failure, is a [`ConversionResult`]. The batch coordinator relies on
//! that to guarantee exactly one result per dispatched file.

use crate::config::ConversionConfig;
use crate::error::{ConversionError, DocumarkError};
use crate::metadata::{should_skip, ConversionRecord, MetadataStore};
use crate::output::ConversionResult;
use crate::pattern::{OutputPattern, PatternVars};
use crate::pipeline::llm::ModelInvoker;
use crate::pipeline::render::RenderOptions;
use crate::processor::Processor;
use crate::prompts;
use crate::provider::ModelProvider;
use crate::source::SourceDocument;
use chrono::Local;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Converter state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    Pending,
    Skipped,
    Rendering,
    Converting,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for ConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionState::Pending => "PENDING",
            ConversionState::Skipped => "SKIPPED",
            ConversionState::Rendering => "RENDERING",
            ConversionState::Converting => "CONVERTING",
            ConversionState::Writing => "WRITING",
            ConversionState::Done => "DONE",
            ConversionState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One file's worth of work. Built per invocation, never persisted.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source: PathBuf,
    pub model: String,
    pub pattern: OutputPattern,
    pub render: RenderOptions,
    /// Replaces the default user instruction.
    pub prompt: Option<String>,
}

/// Renders, transcribes and writes single files.
///
/// Cheap to clone: the provider and metadata store are shared.
#[derive(Clone)]
pub struct Converter {
    config: Arc<ConversionConfig>,
    pattern: OutputPattern,
    invoker: ModelInvoker,
    store: Arc<MetadataStore>,
    base_dir: PathBuf,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl Converter {
    /// Parse the pattern and resolve the base directory up front, so
    /// configuration errors surface before any file is touched.
    pub fn new(
        config: ConversionConfig,
        provider: Arc<dyn ModelProvider>,
        store: Arc<MetadataStore>,
    ) -> Result<Self, DocumarkError> {
        let pattern = OutputPattern::parse(&config.pattern)?;
        let base_dir = match &config.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()
                .map_err(|e| DocumarkError::Internal(format!("cannot read working directory: {e}")))?,
        };
        // Sources are canonical, so the base must be too for `{relative_dir}`.
        let base_dir = base_dir.canonicalize().unwrap_or(base_dir);
        let invoker = ModelInvoker::new(provider, &config);

        Ok(Self {
            config: Arc::new(config),
            pattern,
            invoker,
            store,
            base_dir,
        })
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    /// The request this converter would build for `path`.
    pub fn request_for(&self, path: &Path) -> ConversionRequest {
        ConversionRequest {
            source: path.to_path_buf(),
            model: self.config.model.clone(),
            pattern: self.pattern.clone(),
            render: RenderOptions::from_config(&self.config),
            prompt: self.config.prompt.clone(),
        }
    }

    /// Convert `path` with the configured settings.
    pub async fn convert_file(&self, path: &Path) -> ConversionResult {
        self.convert(self.request_for(path)).await
    }

    /// Run the state machine for one request.
    pub async fn convert(&self, request: ConversionRequest) -> ConversionResult {
        let start = Instant::now();
        let model = request.model.clone();
        let display = request.source.clone();

        let result = match self.run(&request).await {
            Ok(result) => result,
            Err(e) => {
                transition(&display, ConversionState::Failed);
                warn!("✗ {}: {}", display.display(), e);
                ConversionResult::failed(display.clone(), e, model)
            }
        };
        result.with_duration(start.elapsed().as_millis() as u64)
    }

    async fn run(&self, request: &ConversionRequest) -> Result<ConversionResult, ConversionError> {
        // ── PENDING ──────────────────────────────────────────────────────
        transition(&request.source, ConversionState::Pending);
        let source = SourceDocument::snapshot(&request.source).await?;
        let record = self.store.lookup(&source.path);

        if !self.config.force && should_skip(&source, record.as_ref()) {
            transition(&source.path, ConversionState::Skipped);
            info!("Skipping {} (unchanged)", source.path.display());
            let output = record.map(|r| r.output_path).unwrap_or_default();
            return Ok(ConversionResult::skipped(source.path, output, request.model.clone()));
        }

        // ── RENDERING ────────────────────────────────────────────────────
        transition(&source.path, ConversionState::Rendering);
        let processor = Processor::for_source(&source)?;
        let units = processor.process(&source, &request.render).await?;
        debug!(
            "{}: {} {} unit(s)",
            source.path.display(),
            units.len(),
            processor
        );

        // ── CONVERTING ───────────────────────────────────────────────────
        transition(&source.path, ConversionState::Converting);
        let prompt = request
            .prompt
            .clone()
            .unwrap_or_else(|| prompts::default_user_prompt(&source.file_name()));
        let markdown = self
            .invoker
            .convert(units, &request.model, &prompt)
            .await
            .map_err(|e| e.with_path(&source.path))?;

        // ── WRITING ──────────────────────────────────────────────────────
        transition(&source.path, ConversionState::Writing);
        let output = self.output_path(&source, &request.pattern)?;
        if output == source.path {
            return Err(ConversionError::OutputWrite {
                path: output,
                detail: "output path is the source file itself".into(),
            });
        }
        write_markdown(&output, &markdown).await?;
        self.store
            .upsert(ConversionRecord::new(&source, output.clone(), request.model.clone()))
            .await?;

        // ── DONE ─────────────────────────────────────────────────────────
        transition(&source.path, ConversionState::Done);
        info!(
            "✓ {} → {} ({} bytes)",
            source.path.display(),
            output.display(),
            markdown.len()
        );
        Ok(ConversionResult::done(
            source.path,
            output,
            markdown.len(),
            request.model.clone(),
        ))
    }

    fn output_path(&self, source: &SourceDocument, pattern: &OutputPattern) -> Result<PathBuf, ConversionError> {
        if let Some(file) = &self.config.output_file {
            return Ok(file.clone());
        }
        let vars = PatternVars::for_source(&source.path, &self.base_dir, Local::now());
        Ok(pattern.resolve_for(
            &vars,
            &source.path,
            self.config.output_dir.as_deref(),
            &self.base_dir,
        )?)
    }
}

fn transition(path: &Path, state: ConversionState) {
    debug!("{} → {}", path.display(), state);
}

/// Write `markdown` to `path` via a sibling temp file and a rename, so a
/// reader never sees a half-written document.
async fn write_markdown(path: &Path, markdown: &str) -> Result<(), ConversionError> {
    let failed = |e: std::io::Error| ConversionError::OutputWrite {
        path: path.to_path_buf(),
        detail: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let written = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(markdown.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(failed(e));
    }
    Ok(())
}
