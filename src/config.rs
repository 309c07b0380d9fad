//! Configuration types for document-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Every knob lives in one struct so it
//! can be cloned into each concurrent worker and logged as a unit.
//!
//! Provider selection and credentials are deliberately *not* in here: they
//! are resolved once into a [`ProviderConfig`] and handed to the provider at
//! construction, so nothing in the pipeline reads the environment.

use crate::error::DocumarkError;
use crate::pipeline::retry::RetryPolicy;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default model identifier, in `provider/model` form.
pub const DEFAULT_MODEL: &str = "gemini/gemini-2.5-flash";

/// Default output pattern: `report.pdf` → `report.md` next to the source.
pub const DEFAULT_PATTERN: &str = "{stem}.md";

/// Default location of the conversion record file, relative to the working directory.
pub const DEFAULT_METADATA_PATH: &str = ".documark_cache/records.json";

/// Per-call provider timeout, in seconds.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 300;

/// Configuration for a conversion run.
///
/// # Example
/// ```rust
/// use documark::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .dpi(150)
///     .concurrency(8)
///     .model("openai/gpt-4.1-nano")
///     .pattern("converted/{stem}.md")
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 150);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Rendering DPI for PDF and DOCX pages. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Longest edge, in pixels, of any image sent to the model. Default: 2048.
    ///
    /// Larger pages are downsampled preserving aspect ratio; smaller ones are
    /// never upsampled.
    pub max_image_dimension: u32,

    /// Encoded size above which a PNG page is re-encoded as JPEG. Default: 4 MiB.
    pub max_image_bytes: usize,

    /// JPEG quality used when a page exceeds `max_image_bytes`. Default: 85.
    pub jpeg_quality: u8,

    /// Maximum simultaneously in-flight file conversions. Default: 4.
    pub concurrency: usize,

    /// Model identifier, e.g. `gemini/gemini-2.5-flash` or `openai/gpt-4.1-nano`.
    pub model: String,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per document. Default: 32000.
    pub max_tokens: usize,

    /// Backoff policy for transient provider failures.
    pub retry: RetryPolicy,

    /// Attempts allowed when the model reply fails schema validation. Default: 3.
    pub max_output_attempts: u32,

    /// Per-call provider timeout. Default: 300 s.
    pub api_timeout: Duration,

    /// Replaces the default user instruction when set.
    pub prompt: Option<String>,

    /// Output path template. Default: [`DEFAULT_PATTERN`].
    pub pattern: String,

    /// Directory that relative resolved paths are anchored at.
    ///
    /// When `None`, outputs land beside their source (or under
    /// `base_dir` for patterns using `{relative_dir}`).
    pub output_dir: Option<PathBuf>,

    /// Explicit output file for single-file conversions. Overrides the pattern.
    pub output_file: Option<PathBuf>,

    /// Root that `{relative_dir}` is computed against. Default: working directory.
    pub base_dir: Option<PathBuf>,

    /// Where conversion records are persisted. Default: [`DEFAULT_METADATA_PATH`].
    pub metadata_path: PathBuf,

    /// Convert even when the stored content hash matches. Default: false.
    pub force: bool,

    /// External command used to turn DOCX/DOC into PDF. Default: `soffice`.
    pub docx_converter: String,

    /// Explicit pdfium shared library. When `None`, the working directory and
    /// then the system library path are tried.
    pub pdfium_library: Option<PathBuf>,

    /// Receives batch/file lifecycle events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_image_dimension: 2048,
            max_image_bytes: 4 * 1024 * 1024,
            jpeg_quality: 85,
            concurrency: 4,
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.1,
            max_tokens: 32_000,
            retry: RetryPolicy::default(),
            max_output_attempts: 3,
            api_timeout: Duration::from_secs(DEFAULT_API_TIMEOUT_SECS),
            prompt: None,
            pattern: DEFAULT_PATTERN.to_string(),
            output_dir: None,
            output_file: None,
            base_dir: None,
            metadata_path: PathBuf::from(DEFAULT_METADATA_PATH),
            force: false,
            docx_converter: "soffice".to_string(),
            pdfium_library: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("dpi", &self.dpi)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("retry", &self.retry)
            .field("max_output_attempts", &self.max_output_attempts)
            .field("pattern", &self.pattern)
            .field("output_dir", &self.output_dir)
            .field("output_file", &self.output_file)
            .field("metadata_path", &self.metadata_path)
            .field("force", &self.force)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px.max(64);
        self
    }

    pub fn max_image_bytes(mut self, bytes: usize) -> Self {
        self.config.max_image_bytes = bytes;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_output_attempts(mut self, n: u32) -> Self {
        self.config.max_output_attempts = n.max(1);
        self
    }

    pub fn api_timeout(mut self, timeout: Duration) -> Self {
        self.config.api_timeout = timeout;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.pattern = pattern.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_file = Some(path.into());
        self
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.base_dir = Some(dir.into());
        self
    }

    pub fn metadata_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.metadata_path = path.into();
        self
    }

    pub fn force(mut self, v: bool) -> Self {
        self.config.force = v;
        self
    }

    pub fn docx_converter(mut self, command: impl Into<String>) -> Self {
        self.config.docx_converter = command.into();
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// The output pattern is parsed here so a malformed template fails
    /// before any file is touched.
    pub fn build(self) -> Result<ConversionConfig, DocumarkError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(DocumarkError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(DocumarkError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(DocumarkError::InvalidConfig(
                "Model identifier must not be empty".into(),
            ));
        }
        crate::pattern::OutputPattern::parse(&c.pattern)?;
        Ok(self.config)
    }
}

/// Environment variables holding each provider's key, in lookup order.
const PROVIDER_KEY_VARS: &[(&str, &[&str])] = &[
    ("gemini", &["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
    ("openai", &["OPENAI_API_KEY"]),
    ("anthropic", &["ANTHROPIC_API_KEY"]),
    ("mistral", &["MISTRAL_API_KEY"]),
];

/// Provider selection and the credentials known to be available.
///
/// `edgequake-llm` builds its clients from the process environment
/// (`OPENAI_API_KEY`, `GEMINI_API_KEY`, …), so [`from_env`](Self::from_env)
/// is the normal way to build one. Passed to
/// [`crate::provider::EdgequakeProvider::new`].
#[derive(Clone, Default)]
pub struct ProviderConfig {
    /// Provider used when a model identifier has no `provider/` prefix.
    pub default_provider: String,

    /// API keys by provider name (`openai`, `anthropic`, `gemini`, …).
    ///
    /// Only consulted to decide whether a provider is usable before any
    /// request is made. The key that authenticates calls is the one
    /// `edgequake-llm` reads from the environment; a key listed here but
    /// missing from the environment fails at client creation.
    pub api_keys: Vec<(String, String)>,

    /// Providers that need no key (local runtimes such as `ollama`).
    pub keyless_providers: Vec<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.api_keys.iter().map(|(p, _)| p.as_str()).collect();
        f.debug_struct("ProviderConfig")
            .field("default_provider", &self.default_provider)
            .field("api_keys", &keys)
            .field("keyless_providers", &self.keyless_providers)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            default_provider: default_provider.into(),
            api_keys: Vec::new(),
            keyless_providers: vec!["ollama".to_string(), "lmstudio".to_string()],
        }
    }

    /// Read `DOCUMARK_PROVIDER` and the provider key variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default_provider = lookup("DOCUMARK_PROVIDER")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "gemini".to_string());
        let mut config = Self::new(default_provider);
        for (provider, vars) in PROVIDER_KEY_VARS {
            if let Some(key) = vars
                .iter()
                .filter_map(|v| lookup(v))
                .find(|k| !k.trim().is_empty())
            {
                config = config.with_api_key(*provider, key);
            }
        }
        config
    }

    pub fn with_api_key(mut self, provider: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.is_empty() {
            self.api_keys.push((provider.into(), key));
        }
        self
    }

    /// Whether calls to `provider` can be authenticated.
    pub fn has_credentials(&self, provider: &str) -> bool {
        self.keyless_providers.iter().any(|p| p == provider)
            || self.api_keys.iter().any(|(p, _)| p == provider)
    }
}
