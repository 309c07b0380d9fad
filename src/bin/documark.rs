//! CLI binary for documark.
//!
//! A thin shim over the library crate: maps flags onto
//! `ConversionConfig`, resolves provider credentials from the environment,
//! and prints per-file progress and a summary table.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use documark::metadata::RecordStatus;
use documark::provider::list_models;
use documark::{
    collect_sources, supported_extensions, BatchCoordinator, BatchProgressCallback, BatchReport,
    BatchSummary, ConversionConfig, ConversionResult, ConversionStatus, Converter,
    EdgequakeProvider, MetadataStore, Processor, ProgressCallback, ProviderConfig, SourceDocument,
    SourceFilter,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the whole batch, one log line per finished file. Files
/// complete out of order, so every line names its file.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.reset_eta();
    }

    fn on_file_start(&self, path: &Path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.bar.set_message(name);
    }

    fn on_file_complete(&self, result: &ConversionResult) {
        let secs = dim(&format!("{:.1}s", result.duration_ms as f64 / 1000.0));
        let line = match result.status {
            ConversionStatus::Done => format!(
                "  {} {}  {}  {}",
                green("✓"),
                result.source.display(),
                dim(&format!("{:>6} bytes", result.markdown_len)),
                secs
            ),
            ConversionStatus::Skipped => format!(
                "  {} {}  {}",
                dim("–"),
                result.source.display(),
                dim("unchanged, skipped")
            ),
            ConversionStatus::Failed => format!(
                "  {} {}  {}",
                red("✗"),
                result.source.display(),
                red(&truncate(
                    &result
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_default(),
                    100
                ))
            ),
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one file next to its source
  documark convert report.pdf

  # Convert to an explicit output file
  documark convert report.pdf -o report.md

  # Convert a tree, mirroring it under markdown/
  documark convert docs/ -r --pattern "markdown/{relative_dir}/{stem}.md"

  # Only PDFs and Word files, skipping drafts/
  documark convert docs/ -r --include "*.pdf,*.docx" --exclude "drafts/*"

  # Another model, eight files at a time
  documark convert scans/ --model openai/gpt-4.1-mini --workers 8

  # What would be converted?
  documark status docs/

PATTERN VARIABLES:
  {filename} {stem} {ext} {dir} {relative_dir} {date} {time} {timestamp}
  {filename} and {stem} are the name without extension.
  Use {{ and }} for literal braces.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY / GOOGLE_API_KEY   Google Gemini API key
  OPENAI_API_KEY                    OpenAI API key
  ANTHROPIC_API_KEY                 Anthropic API key
  MISTRAL_API_KEY                   Mistral API key
  RUST_LOG                          Overrides the log filter
"#;

/// Convert documents to Markdown using multimodal LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "documark",
    version,
    about = "Convert PDF, DOCX, image and text files to Markdown using multimodal LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Location of the conversion-record store.
    #[arg(long, global = true, env = "DOCUMARK_METADATA")]
    metadata: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCUMARK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCUMARK_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert files or directories to Markdown.
    Convert(ConvertArgs),
    /// Show which files are up to date and which need conversion.
    Status {
        /// Directory to inspect.
        #[arg(default_value = ".")]
        dir: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Drop records for deleted sources, or older than N days.
    Clean {
        #[arg(long)]
        older_than: Option<u32>,
    },
    /// List common model identifiers by provider.
    ListModels,
    /// List supported file extensions.
    Supported,
}

/// Glob filters for files found under a directory.
#[derive(Args, Debug)]
struct FilterArgs {
    /// Comma-separated globs a file must match, e.g. '*.pdf,*.docx'.
    #[arg(long, value_delimiter = ',', env = "DOCUMARK_INCLUDE")]
    include: Vec<String>,

    /// Comma-separated globs to skip, e.g. 'drafts/*,*.tmp.pdf'.
    #[arg(long, value_delimiter = ',', env = "DOCUMARK_EXCLUDE")]
    exclude: Vec<String>,
}

impl FilterArgs {
    fn source_filter(&self) -> Result<SourceFilter> {
        SourceFilter::new(self.include.as_slice(), self.exclude.as_slice()).context("Invalid --include/--exclude")
    }
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Files and/or directories to convert.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Output directory, or an output file when converting a single file.
    #[arg(short, long, env = "DOCUMARK_OUTPUT")]
    output: Option<PathBuf>,

    /// Model identifier, `provider/model` or a bare Gemini model name.
    #[arg(short, long, env = "DOCUMARK_MODEL", default_value = documark::config::DEFAULT_MODEL)]
    model: String,

    /// Rendering DPI (72–600).
    #[arg(long, env = "DOCUMARK_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Replace the default conversion instruction.
    #[arg(short, long, env = "DOCUMARK_PROMPT")]
    prompt: Option<String>,

    /// Descend into subdirectories.
    #[arg(short, long)]
    recursive: bool,

    #[command(flatten)]
    filter: FilterArgs,

    /// Output filename pattern.
    #[arg(long, env = "DOCUMARK_PATTERN", default_value = documark::config::DEFAULT_PATTERN)]
    pattern: String,

    /// Convert even when the source is unchanged since the last run.
    #[arg(short, long)]
    force: bool,

    /// Number of files converted concurrently.
    #[arg(short, long, env = "DOCUMARK_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Print the batch report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCUMARK_NO_PROGRESS")]
    no_progress: bool,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "DOCUMARK_API_TIMEOUT",
          default_value_t = documark::config::DEFAULT_API_TIMEOUT_SECS)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries per-file feedback, so library INFO logs are
    // muted while it is shown.
    let show_progress = match &cli.command {
        Command::Convert(args) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let metadata_path = cli
        .metadata
        .clone()
        .unwrap_or_else(|| PathBuf::from(documark::config::DEFAULT_METADATA_PATH));

    match &cli.command {
        Command::Convert(args) => {
            let ok = run_convert(args, &metadata_path, show_progress, cli.quiet).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Command::Status { dir, filter } => run_status(dir, filter, &metadata_path).await?,
        Command::Clean { older_than } => {
            let store = MetadataStore::open(&metadata_path);
            let removed = store
                .clean(*older_than)
                .await
                .context("Failed to clean metadata store")?;
            println!("Removed {removed} record(s), {} remaining", store.len());
        }
        Command::ListModels => {
            for (provider, models) in list_models() {
                println!("{}", bold(provider));
                for m in models {
                    println!("  {m}");
                }
            }
        }
        Command::Supported => {
            for p in Processor::all() {
                let exts: Vec<String> = p.extensions().iter().map(|e| format!(".{e}")).collect();
                println!("{:<6} {}", p.to_string(), exts.join(" "));
            }
            if cli.verbose {
                eprintln!("{} extensions", supported_extensions().len());
            }
        }
    }

    Ok(())
}

/// Returns whether every file succeeded.
async fn run_convert(
    args: &ConvertArgs,
    metadata_path: &Path,
    show_progress: bool,
    quiet: bool,
) -> Result<bool> {
    let sources = collect_sources(&args.paths, args.recursive, &args.filter.source_filter()?)
        .context("Failed to collect inputs")?;
    if sources.is_empty() {
        if !quiet {
            eprintln!("{} no supported files found", yellow("⚠"));
        }
        return Ok(true);
    }

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let mut builder = ConversionConfig::builder()
        .model(&args.model)
        .dpi(args.dpi)
        .pattern(&args.pattern)
        .concurrency(args.workers)
        .force(args.force)
        .api_timeout(Duration::from_secs(args.api_timeout))
        .metadata_path(metadata_path);
    if let Some(prompt) = &args.prompt {
        builder = builder.prompt(prompt);
    }
    if let Some(out) = &args.output {
        builder = if is_output_file(out, sources.len()) {
            builder.output_file(out)
        } else {
            builder.output_dir(out)
        };
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let provider = EdgequakeProvider::new(ProviderConfig::from_env())
        .with_timeout(config.api_timeout);
    let store = Arc::new(MetadataStore::open(&config.metadata_path));
    let converter = Converter::new(config, Arc::new(provider), store)?;
    let batch = BatchCoordinator::new(converter);

    let cancel = batch.cancellation_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} interrupted, finishing files in progress…", yellow("⚠"));
            cancel.cancel();
        }
    });

    let report = batch.run(sources).await?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !quiet {
        print_summary(&report);
    }

    let ok = report.aborted.is_none() && report.summary.failed == 0 && !report.cancelled;
    if let Some(cause) = &report.aborted {
        eprintln!("{} batch aborted: {}", red("✘"), cause);
    }
    Ok(ok)
}

/// A single input with an extension is an output *file*; anything else is
/// a directory.
fn is_output_file(output: &Path, inputs: usize) -> bool {
    inputs == 1 && !output.is_dir() && output.extension().is_some()
}

fn print_summary(report: &BatchReport) {
    let s = &report.summary;
    eprintln!();
    eprintln!("  {:<10} {:>5}", bold("Status"), bold("Files"));
    eprintln!("  {:<10} {:>5}", green("DONE"), s.done);
    eprintln!("  {:<10} {:>5}", dim("SKIPPED"), s.skipped);
    eprintln!("  {:<10} {:>5}", red("FAILED"), s.failed);
    if s.abandoned > 0 {
        eprintln!("  {:<10} {:>5}", yellow("ABANDONED"), s.abandoned);
    }
    eprintln!("  {}", dim(&format!("{} file(s) in {}ms", s.total, s.duration_ms)));

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        eprintln!();
        for r in failures {
            let msg = r.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
            eprintln!("  {} {}: {}", red("✗"), r.source.display(), msg);
        }
    }
}

async fn run_status(dir: &Path, filter: &FilterArgs, metadata_path: &Path) -> Result<()> {
    let store = MetadataStore::open(metadata_path);
    let sources =
        collect_sources(&[dir], true, &filter.source_filter()?).context("Failed to collect inputs")?;
    let (mut current, mut pending) = (0usize, 0usize);

    for path in sources {
        let source = match SourceDocument::snapshot(&path).await {
            Ok(s) => s,
            Err(e) => {
                println!("  {} {}", red("?"), e);
                continue;
            }
        };
        let (mark, label) = match store.status(&source) {
            RecordStatus::UpToDate => {
                current += 1;
                (green("✓"), "up to date")
            }
            RecordStatus::Changed => {
                pending += 1;
                (yellow("●"), "changed")
            }
            RecordStatus::New => {
                pending += 1;
                (yellow("+"), "new")
            }
        };
        println!("  {} {}  {}", mark, source.path.display(), dim(label));
    }
    println!("{current} up to date, {pending} need conversion");
    Ok(())
}
