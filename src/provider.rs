//! Model providers: the seam between the pipeline and an LLM API.
//!
//! The pipeline only ever talks to [`ModelProvider`]. Production code uses
//! [`EdgequakeProvider`], which routes `provider/model` identifiers through
//! `edgequake-llm`; tests plug in a scripted fake.
//!
//! ## Error classification
//!
//! Provider SDK errors arrive as strings. [`classify_error`] sorts them into
//! [`ProviderError::Fatal`] (bad key, unknown model, malformed request: the
//! same call will fail again) and [`ProviderError::Transient`] (everything
//! else, including rate limits and timeouts). Unknown messages are treated
//! as transient so a flaky network never aborts a batch.

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::pipeline::encode::EncodedImage;
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Providers accepted as the `provider/` prefix of a model identifier.
pub const KNOWN_PROVIDERS: &[&str] = &[
    "openai",
    "anthropic",
    "gemini",
    "mistral",
    "openrouter",
    "xai",
    "ollama",
    "lmstudio",
];

/// Content of one page in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageContent {
    Image(EncodedImage),
    Text(String),
}

/// One page in a request, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPage {
    pub page: usize,
    pub content: PageContent,
}

/// Everything a provider needs for one completion.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// `provider/model` or a bare model name.
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Pages in document order.
    pub pages: Vec<EncodedPage>,
    /// JSON schema the reply must satisfy. Providers turn it into the
    /// reply contract appended to the system turn.
    pub response_schema: Value,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// A multimodal completion backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Run one completion and return the raw reply text.
    async fn complete(&self, request: &ModelRequest) -> Result<String, ProviderError>;
}

/// Split `provider/model`; a bare name uses `default_provider`.
pub fn parse_model_id(model_id: &str, default_provider: &str) -> Result<(String, String), ProviderError> {
    let model_id = model_id.trim();
    let (provider, model) = match model_id.split_once('/') {
        Some((p, m)) => (p.trim().to_ascii_lowercase(), m.trim()),
        None => (default_provider.to_ascii_lowercase(), model_id),
    };
    if model.is_empty() {
        return Err(ProviderError::Fatal(format!(
            "model identifier '{model_id}' has no model name"
        )));
    }
    if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
        return Err(ProviderError::Fatal(format!(
            "unknown provider '{provider}' in model identifier '{model_id}'. Known providers: {}",
            KNOWN_PROVIDERS.join(", ")
        )));
    }
    Ok((provider, model.to_string()))
}

/// `status 401`, `HTTP/1.1 403`, `status code: 404` and the like.
static FATAL_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:status|http(?:/[\d.]+)?)(?:\s+code)?[\s:=]*(?:401|403|404)\b").unwrap()
});

const FATAL_MARKERS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "invalid api key",
    "invalid_api_key",
    "incorrect api key",
    "api key not valid",
    "authentication",
    "permission denied",
    "model not found",
    "model_not_found",
    "does not exist",
    "not supported",
    "bad request",
    "invalid_request",
];

/// Sort a provider error message into fatal or transient.
pub fn classify_error(message: &str) -> ProviderError {
    let lower = message.to_ascii_lowercase();
    if FATAL_STATUS.is_match(message) || FATAL_MARKERS.iter().any(|m| lower.contains(m)) {
        ProviderError::Fatal(message.to_string())
    } else {
        ProviderError::Transient(message.to_string())
    }
}

/// [`ModelProvider`] backed by `edgequake-llm`.
///
/// Underlying clients are created on first use of each model and cached,
/// so a batch of hundreds of files builds one HTTP client per model.
pub struct EdgequakeProvider {
    config: ProviderConfig,
    timeout: Duration,
    clients: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl std::fmt::Debug for EdgequakeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgequakeProvider")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl EdgequakeProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            timeout: Duration::from_secs(300),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Per-call timeout. An elapsed timeout is a transient error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check that `model_id` names a known provider we hold credentials for.
    pub fn validate_model(&self, model_id: &str) -> Result<(String, String), ProviderError> {
        let (provider, model) = parse_model_id(model_id, &self.config.default_provider)?;
        if !self.config.has_credentials(&provider) {
            return Err(ProviderError::Fatal(format!(
                "no API key configured for provider '{provider}' (set {}_API_KEY)",
                provider.to_ascii_uppercase()
            )));
        }
        Ok((provider, model))
    }

    fn client(&self, model_id: &str) -> Result<Arc<dyn LLMProvider>, ProviderError> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(model_id) {
            return Ok(Arc::clone(client));
        }

        let (provider, model) = self.validate_model(model_id)?;
        let client = ProviderFactory::create_llm_provider(&provider, &model).map_err(|e| {
            ProviderError::Fatal(format!("cannot create provider '{provider}': {e}"))
        })?;
        info!("Created {} client for model {}", provider, model);
        clients.insert(model_id.to_string(), Arc::clone(&client));
        Ok(client)
    }
}

/// System turn: the instructions followed by the reply contract.
///
/// `edgequake-llm`'s `CompletionOptions` has no strict JSON-schema response
/// format, so the schema travels in the system message and the invoker
/// validates the reply against it.
fn system_turn(request: &ModelRequest) -> String {
    format!(
        "{}\n\n{}",
        request.system_prompt,
        prompts::response_contract(&request.response_schema)
    )
}

/// Flatten a request into the user turn: the instruction followed by any
/// text pages, plus every page image in order.
fn user_turn(request: &ModelRequest) -> (String, Vec<ImageData>) {
    let mut text = request.user_prompt.clone();
    let mut images = Vec::new();

    for page in &request.pages {
        match &page.content {
            PageContent::Image(img) => {
                images.push(ImageData::new(img.data.clone(), img.mime_type).with_detail("high"));
            }
            PageContent::Text(body) => {
                text.push_str(&format!("\n\n--- Page {} ---\n{}", page.page, body));
            }
        }
    }
    (text, images)
}

#[async_trait]
impl ModelProvider for EdgequakeProvider {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ProviderError> {
        let client = self.client(&request.model)?;
        let (text, images) = user_turn(request);
        let messages = vec![
            ChatMessage::system(&system_turn(request)),
            ChatMessage::user_with_images(&text, images),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = tokio::time::timeout(self.timeout, client.chat(&messages, Some(&options)))
            .await
            .map_err(|_| {
                ProviderError::Transient(format!("request timed out after {:?}", self.timeout))
            })?
            .map_err(|e| classify_error(&e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            request.model, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Common model identifiers, grouped by provider.
pub fn list_models() -> Vec<(&'static str, &'static [&'static str])> {
    vec![
        (
            "Gemini (GEMINI_API_KEY)",
            &[
                "gemini/gemini-2.5-flash",
                "gemini/gemini-2.5-pro",
                "gemini/gemini-2.0-flash",
            ][..],
        ),
        (
            "OpenAI (OPENAI_API_KEY)",
            &["openai/gpt-4.1-nano", "openai/gpt-4.1-mini", "openai/gpt-4.1", "openai/gpt-4o"][..],
        ),
        (
            "Anthropic (ANTHROPIC_API_KEY)",
            &[
                "anthropic/claude-sonnet-4-20250514",
                "anthropic/claude-3-5-haiku-20241022",
            ][..],
        ),
        (
            "Mistral (MISTRAL_API_KEY)",
            &["mistral/pixtral-large-latest", "mistral/mistral-medium-latest"][..],
        ),
        ("Ollama (local, no key)", &["ollama/llava", "ollama/qwen2.5vl"][..]),
    ]
}
