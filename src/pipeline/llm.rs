//! Model invocation: rendered units in, cleaned Markdown out.
//!
//! All prompt wording lives in [`crate::prompts`]; this module owns the two
//! retry loops and the reply contract.
//!
//! ## Two kinds of retry
//!
//! * **Provider failures** follow the injected [`RetryPolicy`]: transient
//!   errors back off exponentially, fatal ones surface immediately.
//! * **Unusable replies** (not JSON, wrong shape, empty) are re-requested
//!   with the same pages up to `max_output_attempts` times, with a short
//!   repair hint appended to the instruction.

use crate::config::ConversionConfig;
use crate::error::{ConversionError, ProviderError};
use crate::pipeline::encode::{encode_page, EncodeLimits};
use crate::pipeline::postprocess::clean_markdown;
use crate::pipeline::render::RenderedUnit;
use crate::pipeline::retry::RetryPolicy;
use crate::prompts;
use crate::provider::{EncodedPage, ModelProvider, ModelRequest, PageContent};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MarkdownReply {
    markdown_content: String,
}

/// Wraps a [`ModelProvider`] with the structured-output contract.
#[derive(Clone)]
pub struct ModelInvoker {
    provider: Arc<dyn ModelProvider>,
    retry: RetryPolicy,
    max_output_attempts: u32,
    temperature: f32,
    max_tokens: usize,
    limits: EncodeLimits,
}

impl ModelInvoker {
    pub fn new(provider: Arc<dyn ModelProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            retry: config.retry,
            max_output_attempts: config.max_output_attempts.max(1),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            limits: EncodeLimits {
                max_dimension: config.max_image_dimension,
                max_bytes: config.max_image_bytes,
                jpeg_quality: config.jpeg_quality,
            },
        }
    }

    /// Transcribe `units` (in document order) with `model_id`.
    ///
    /// `prompt` is the user instruction; the system prompt and response
    /// schema are fixed.
    pub async fn convert(
        &self,
        units: Vec<RenderedUnit>,
        model_id: &str,
        prompt: &str,
    ) -> Result<String, ConversionError> {
        let pages = self.encode(units).await?;
        let mut request = ModelRequest {
            model: model_id.to_string(),
            system_prompt: prompts::SYSTEM_PROMPT.to_string(),
            user_prompt: prompt.to_string(),
            pages,
            response_schema: prompts::response_schema(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut problem = String::new();
        for attempt in 1..=self.max_output_attempts {
            if attempt > 1 {
                request.user_prompt = format!("{prompt}\n\n{}", prompts::repair_hint(&problem));
            }
            let raw = self.complete_with_retry(&request).await?;
            match parse_reply(&raw) {
                Ok(markdown) => {
                    debug!(
                        "{}: reply accepted on attempt {} ({} chars)",
                        model_id,
                        attempt,
                        markdown.len()
                    );
                    return Ok(clean_markdown(&markdown));
                }
                Err(e) => {
                    warn!(
                        "{}: unusable reply (attempt {}/{}): {}",
                        model_id, attempt, self.max_output_attempts, e
                    );
                    problem = e;
                }
            }
        }

        Err(ConversionError::ModelOutput {
            attempts: self.max_output_attempts,
            detail: problem,
        })
    }

    async fn encode(&self, units: Vec<RenderedUnit>) -> Result<Vec<EncodedPage>, ConversionError> {
        let limits = self.limits;
        tokio::task::spawn_blocking(move || {
            units
                .into_iter()
                .map(|unit| match unit {
                    RenderedUnit::Image { page, image } => encode_page(image, &limits)
                        .map(|img| EncodedPage {
                            page,
                            content: PageContent::Image(img),
                        })
                        .map_err(|e| {
                            ConversionError::render("", format!("page {page}: encode failed: {e}"))
                        }),
                    RenderedUnit::Text { page, text } => Ok(EncodedPage {
                        page,
                        content: PageContent::Text(text),
                    }),
                })
                .collect()
        })
        .await
        .map_err(|e| ConversionError::render("", format!("encode task panicked: {e}")))?
    }

    async fn complete_with_retry(&self, request: &ModelRequest) -> Result<String, ConversionError> {
        let max = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                warn!(
                    "{}: retry {}/{} after {:?}",
                    request.model,
                    attempt - 1,
                    max - 1,
                    delay
                );
                sleep(delay).await;
            }

            match self.provider.complete(request).await {
                Ok(raw) => return Ok(raw),
                Err(e) if attempt < max && self.retry.should_retry(&e) => {
                    warn!("{}: attempt {} failed: {}", request.model, attempt, e.message());
                }
                Err(ProviderError::Fatal(detail)) => {
                    return Err(ConversionError::FatalProvider { detail })
                }
                Err(ProviderError::Transient(detail)) => {
                    return Err(ConversionError::TransientProvider {
                        attempts: attempt,
                        detail,
                    })
                }
            }
            attempt += 1;
        }
    }
}

/// Extract `markdown_content` from a reply.
///
/// Accepts the bare JSON object, the object inside a ```` ```json ```` fence,
/// or the outermost `{…}` span of a chatty reply.
pub fn parse_reply(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty reply".into());
    }

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.trim_end().strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    let candidate = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => return Err("reply is not a JSON object".into()),
    };

    let reply: MarkdownReply = serde_json::from_str(candidate)
        .map_err(|e| format!("reply does not match the response schema: {e}"))?;
    if reply.markdown_content.trim().is_empty() {
        return Err(format!("'{}' is empty", prompts::MARKDOWN_FIELD));
    }
    Ok(reply.markdown_content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies from a script, one per call; repeats the last entry.
    struct Scripted {
        replies: Mutex<Vec<Result<String, ProviderError>>>,
        calls: Mutex<Vec<ModelRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelProvider for Scripted {
        async fn complete(&self, request: &ModelRequest) -> Result<String, ProviderError> {
            self.calls.lock().unwrap().push(request.clone());
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies[0].clone()
            }
        }
    }

    fn ok(md: &str) -> Result<String, ProviderError> {
        Ok(serde_json::json!({ "markdown_content": md }).to_string())
    }

    fn invoker(provider: Arc<Scripted>) -> ModelInvoker {
        let config = ConversionConfig::builder()
            .retry(RetryPolicy::immediate(3))
            .build()
            .unwrap();
        ModelInvoker::new(provider, &config)
    }

    fn text_units() -> Vec<RenderedUnit> {
        vec![
            RenderedUnit::Text { page: 1, text: "alpha".into() },
            RenderedUnit::Text { page: 2, text: "beta".into() },
        ]
    }

    #[test]
    fn parse_plain_and_fenced_replies() {
        assert_eq!(parse_reply(r#"{"markdown_content":"# A"}"#).unwrap(), "# A");
        assert_eq!(
            parse_reply("```json\n{\"markdown_content\": \"# B\"}\n```").unwrap(),
            "# B"
        );
        assert_eq!(
            parse_reply("Sure! {\"markdown_content\": \"# C\"} Hope this helps.").unwrap(),
            "# C"
        );
    }

    #[test]
    fn parse_rejects_off_schema_replies() {
        assert!(parse_reply("# just markdown").is_err());
        assert!(parse_reply(r#"{"content":"x"}"#).is_err());
        assert!(parse_reply(r#"{"markdown_content":"x","note":"hi"}"#).is_err());
        assert!(parse_reply(r#"{"markdown_content":"   "}"#).is_err());
        assert!(parse_reply("").is_err());
    }

    #[tokio::test]
    async fn success_is_post_processed_and_pages_stay_ordered() {
        let provider = Scripted::new(vec![ok("# Title   \n\n\n\nbody")]);
        let md = invoker(provider.clone())
            .convert(text_units(), "ollama/llava", "convert")
            .await
            .unwrap();
        assert_eq!(md, "# Title\n\nbody\n");

        let calls = provider.calls.lock().unwrap();
        let pages: Vec<usize> = calls[0].pages.iter().map(|p| p.page).collect();
        assert_eq!(pages, vec![1, 2]);
        assert_eq!(calls[0].response_schema, prompts::response_schema());
    }

    #[tokio::test]
    async fn invalid_output_is_retried_then_reported() {
        let provider = Scripted::new(vec![Ok("no json here".into())]);
        let err = invoker(provider.clone())
            .convert(text_units(), "ollama/llava", "convert")
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::ModelOutput { attempts: 3, .. }), "got {err:?}");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn invalid_output_recovers_on_second_attempt() {
        let provider = Scripted::new(vec![Ok("oops".into()), ok("fine")]);
        let md = invoker(provider.clone())
            .convert(text_units(), "ollama/llava", "convert")
            .await
            .unwrap();
        assert_eq!(md, "fine\n");
        let calls = provider.calls.lock().unwrap();
        assert!(calls[1].user_prompt.contains("could not be used"));
    }

    #[tokio::test]
    async fn transient_errors_retry_with_backoff_then_succeed() {
        let provider = Scripted::new(vec![
            Err(ProviderError::Transient("HTTP 429".into())),
            Err(ProviderError::Transient("HTTP 503".into())),
            ok("done"),
        ]);
        let md = invoker(provider.clone())
            .convert(text_units(), "ollama/llava", "convert")
            .await
            .unwrap();
        assert_eq!(md, "done\n");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_budget() {
        let provider = Scripted::new(vec![Err(ProviderError::Transient("timeout".into()))]);
        let err = invoker(provider.clone())
            .convert(text_units(), "ollama/llava", "convert")
            .await
            .unwrap_err();
        assert!(
            matches!(err, ConversionError::TransientProvider { attempts: 3, .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let provider = Scripted::new(vec![Err(ProviderError::Fatal("invalid api key".into()))]);
        let err = invoker(provider.clone())
            .convert(text_units(), "ollama/llava", "convert")
            .await
            .unwrap_err();
        assert!(err.aborts_batch());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn images_are_encoded_before_the_call() {
        use image::{DynamicImage, RgbImage};
        let provider = Scripted::new(vec![ok("img")]);
        let units = vec![RenderedUnit::Image {
            page: 1,
            image: DynamicImage::ImageRgb8(RgbImage::new(4, 4)),
        }];
        invoker(provider.clone())
            .convert(units, "ollama/llava", "convert")
            .await
            .unwrap();
        let calls = provider.calls.lock().unwrap();
        assert!(matches!(
            &calls[0].pages[0].content,
            PageContent::Image(img) if img.mime_type == "image/png"
        ));
    }
}
