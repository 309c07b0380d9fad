//! Google Drive shortcut files (`.gdoc`, `.gsheet`, `.gslides`).
//!
//! Drive for desktop syncs these as small JSON stubs that point at the
//! online document. The document is fetched through Google's PDF export
//! endpoint into a temporary file and rasterised like any other PDF.
//! Only documents readable without signing in (shared by link) export
//! this way; anything else comes back as a login page and fails the
//! PDF check.

use crate::error::ConversionError;
use crate::pipeline::render::{render_pdf, RenderOptions, RenderedUnit};
use crate::source::extension_of;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default origin of the export endpoint.
pub const EXPORT_BASE: &str = "https://docs.google.com";

static DOCS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"docs\.google\.com/(?:document|spreadsheets|presentation)/d/([A-Za-z0-9_-]+)").unwrap()
});

/// Which Google editor a shortcut belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoogleDocKind {
    Document,
    Spreadsheet,
    Presentation,
}

impl GoogleDocKind {
    pub fn from_extension(extension: &str) -> Self {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "gsheet" => GoogleDocKind::Spreadsheet,
            "gslides" => GoogleDocKind::Presentation,
            _ => GoogleDocKind::Document,
        }
    }

    fn url_segment(self) -> &'static str {
        match self {
            GoogleDocKind::Document => "document",
            GoogleDocKind::Spreadsheet => "spreadsheets",
            GoogleDocKind::Presentation => "presentation",
        }
    }
}

#[derive(Deserialize)]
struct Shortcut {
    #[serde(default)]
    doc_id: String,
    #[serde(default)]
    url: String,
}

/// Document id from a shortcut's contents: the JSON `doc_id`, else the
/// id inside a `docs.google.com` URL anywhere in the file.
pub fn document_id(contents: &str) -> Option<String> {
    if let Ok(shortcut) = serde_json::from_str::<Shortcut>(contents) {
        let id = shortcut.doc_id.trim();
        if !id.is_empty() {
            return Some(id.to_string());
        }
        if let Some(c) = DOCS_URL.captures(&shortcut.url) {
            return Some(c[1].to_string());
        }
    }
    DOCS_URL.captures(contents).map(|c| c[1].to_string())
}

pub fn export_url(base: &str, kind: GoogleDocKind, doc_id: &str) -> String {
    format!(
        "{}/{}/d/{}/export?format=pdf",
        base.trim_end_matches('/'),
        kind.url_segment(),
        doc_id
    )
}

/// Download the PDF export of the shortcut at `path` and rasterise it.
pub async fn render_google_doc(
    path: &Path,
    options: &RenderOptions,
) -> Result<Vec<RenderedUnit>, ConversionError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConversionError::render(path, format!("cannot read shortcut: {e}")))?;
    let doc_id = document_id(&contents)
        .ok_or_else(|| ConversionError::render(path, "shortcut holds no Google document id"))?;

    let kind = GoogleDocKind::from_extension(&extension_of(path));
    let url = export_url(&options.google_export_base, kind, &doc_id);
    info!("Downloading {} export: {}", path.display(), url);

    let bytes = download(&url, options.download_timeout)
        .await
        .map_err(|detail| ConversionError::render(path, detail))?;
    if !bytes.starts_with(b"%PDF") {
        return Err(ConversionError::render(
            path,
            "export is not a PDF; the document must be shared by link",
        ));
    }

    let tmp = tempfile::Builder::new()
        .prefix("documark-gdoc-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| ConversionError::render(path, format!("cannot create temp file: {e}")))?;
    tokio::fs::write(tmp.path(), &bytes)
        .await
        .map_err(|e| ConversionError::render(path, format!("cannot write temp file: {e}")))?;

    // Failures inside the PDF renderer name the temp file; report the shortcut.
    render_pdf(tmp.path(), options).await.map_err(|e| match e {
        ConversionError::RenderFailure { detail, .. } => ConversionError::render(path, detail),
        other => other,
    })
}

async fn download(url: &str, timeout: Duration) -> Result<Vec<u8>, String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("cannot build HTTP client: {e}"))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            format!("download timed out after {}s", timeout.as_secs())
        } else {
            format!("download failed: {e}")
        }
    })?;
    if !response.status().is_success() {
        return Err(format!("download failed: HTTP {}", response.status()));
    }
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| format!("download failed: {e}"))
}
