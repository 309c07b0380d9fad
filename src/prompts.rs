//! Prompts and the structured-output contract sent to the model.
//!
//! Every prompt lives here so a wording change touches exactly one file and
//! unit tests can inspect prompts without a live model. A per-run override
//! ([`crate::config::ConversionConfig::prompt`]) replaces only the user
//! instruction; the system prompt and response schema are fixed because
//! the invoker's parser depends on them.

use serde_json::{json, Value};

/// Name of the single field in the structured reply.
pub const MARKDOWN_FIELD: &str = "markdown_content";

/// System prompt for every conversion.
pub const SYSTEM_PROMPT: &str = r#"You are an expert document converter. You turn page images and raw text into clean, faithful Markdown.

Rules:
- Transcribe ALL text content in reading order. Do not summarise or omit anything.
- Keep the heading hierarchy: # for the document title, ## for sections, ### for subsections.
- Keep list structure and nesting. Use - for bullets and 1. 2. 3. for numbered items.
- Convert tables to GFM pipe tables; use HTML table markup only when cells span rows or columns.
- Render formulas with LaTeX: $inline$ and $$display$$.
- Describe figures, charts and photos briefly in *italics* on their own line.
- Drop page numbers and headers or footers repeated on every page.
- Pages are given in document order; join them into one continuous document."#;

/// Appended to the system prompt: the reply contract for `schema`.
pub fn response_contract(schema: &Value) -> String {
    format!(
        "Reply with a single JSON object and nothing else, matching this JSON schema:\n{schema}\n\
         Put the complete Markdown document in \"{MARKDOWN_FIELD}\". \
         Do not wrap the Markdown in code fences and do not add commentary."
    )
}

/// JSON schema constraining the reply to one Markdown string.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            MARKDOWN_FIELD: {
                "type": "string",
                "description": "The extracted document content in Markdown format"
            }
        },
        "required": [MARKDOWN_FIELD],
        "additionalProperties": false
    })
}

/// Default user instruction, naming the file being converted.
pub fn default_user_prompt(filename: &str) -> String {
    format!(
        "Convert this document '{filename}' to Markdown. \
         Extract all content while preserving the structure and formatting."
    )
}

/// Sent with the retry after a reply failed to parse.
pub fn repair_hint(problem: &str) -> String {
    format!(
        "Your previous reply could not be used ({problem}). \
         Reply again with only the JSON object described in the instructions."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_requires_only_markdown_field() {
        let schema = response_schema();
        assert_eq!(schema["required"], json!(["markdown_content"]));
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["properties"]["markdown_content"]["type"], "string");
    }

    #[test]
    fn contract_embeds_schema() {
        let c = response_contract(&response_schema());
        assert!(c.contains("\"markdown_content\""));
        assert!(c.contains("additionalProperties"));
    }

    #[test]
    fn default_prompt_names_the_file() {
        assert!(default_user_prompt("q3.pdf").contains("'q3.pdf'"));
    }

    #[test]
    fn system_prompt_covers_tables_and_headings() {
        assert!(SYSTEM_PROMPT.contains("tables"));
        assert!(SYSTEM_PROMPT.contains("heading"));
    }
}
