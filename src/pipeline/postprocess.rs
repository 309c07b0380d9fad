//! Deterministic cleanup of model-written Markdown.
//!
//! Structured output keeps commentary out of the reply, but the Markdown
//! inside the JSON field still carries model habits: an outer
//! ```` ```markdown ```` fence, CRLF line endings, zero-width characters
//! copied from the source, runs of blank lines, invented image links.
//! Each rule is a pure `&str → String` pass; [`RULES`] fixes their order.

use once_cell::sync::Lazy;
use regex::Regex;

type Rule = fn(&str) -> String;

/// Cleanup passes in application order.
///
/// Line endings are normalised before anything splits on `\n`, and the
/// final-newline pass runs last so nothing re-introduces trailing blanks.
pub const RULES: &[(&str, Rule)] = &[
    ("line-endings", normalise_line_endings),
    ("outer-fence", strip_outer_fence),
    ("invisible-chars", strip_invisible),
    ("trailing-whitespace", trim_line_ends),
    ("placeholder-images", caption_placeholder_images),
    ("blank-runs", collapse_blank_runs),
    ("final-newline", single_final_newline),
];

/// Run every rule over `input`.
pub fn clean_markdown(input: &str) -> String {
    RULES
        .iter()
        .fold(input.to_string(), |text, (_, rule)| rule(&text))
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

static OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\A```(?:markdown|md)?[ \t]*\n(.*?)\n?```\s*\z").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match OUTER_FENCE.captures(input.trim()) {
        // A fence that closes mid-document belongs to a code block, not a wrapper.
        Some(caps) if !caps[1].contains("\n```") => caps[1].to_string(),
        _ => input.to_string(),
    }
}

const INVISIBLE: [char; 6] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'];

fn strip_invisible(input: &str) -> String {
    input.replace(INVISIBLE, "")
}

fn trim_line_ends(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

static IMAGE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

/// Page images never reach the model with URLs, so a relative or empty
/// link target is invented. Keep the alt text as an italic caption.
fn caption_placeholder_images(input: &str) -> String {
    IMAGE_LINK
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let target = caps[2].trim();
            if target.starts_with("http://") || target.starts_with("https://") {
                return caps[0].to_string();
            }
            match caps[1].trim() {
                "" => String::new(),
                alt => format!("*{alt}*"),
            }
        })
        .into_owned()
}

static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_runs(input: &str) -> String {
    BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

fn single_final_newline(input: &str) -> String {
    let body = input.trim_matches('\n').trim_end();
    if body.is_empty() {
        String::from("\n")
    } else {
        format!("{body}\n")
    }
}
