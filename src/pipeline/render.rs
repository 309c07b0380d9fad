//! Page rendering: turn a source file into ordered [`RenderedUnit`]s.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks for the whole rasterisation. Running it (and the image
//! decoder, which is equally CPU-bound) on tokio's blocking pool keeps the
//! async workers free to drive other files' provider calls.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 300 DPI is ~10,000 × 14,000 px.
//! The DPI sets the scale, the maximum dimension bounds memory regardless of
//! physical page size.
//!
//! ## DOCX
//!
//! Word documents are first printed to PDF by an external converter
//! (LibreOffice `soffice` by default) into a temporary directory, then
//! rasterised exactly like a PDF. A missing converter or a failed
//! conversion fails the whole render; there is no text-only fallback.

use crate::config::ConversionConfig;
use crate::error::ConversionError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// One page's worth of content, in document order.
#[derive(Debug, Clone)]
pub enum RenderedUnit {
    /// A rasterised page (PDF, DOCX, Google Docs) or a whole image file.
    Image { page: usize, image: DynamicImage },
    /// An extracted text block (plain text, HTML, CSV).
    Text { page: usize, text: String },
}

impl RenderedUnit {
    /// 1-based page number.
    pub fn page(&self) -> usize {
        match self {
            RenderedUnit::Image { page, .. } | RenderedUnit::Text { page, .. } => *page,
        }
    }
}

/// The subset of [`ConversionConfig`] the renderers read.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub dpi: u32,
    pub max_image_dimension: u32,
    pub docx_converter: String,
    pub docx_timeout: Duration,
    pub pdfium_library: Option<PathBuf>,
    /// Origin of the Google Docs PDF export endpoint.
    pub google_export_base: String,
    pub download_timeout: Duration,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from_config(&ConversionConfig::default())
    }
}

impl RenderOptions {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_image_dimension: config.max_image_dimension,
            docx_converter: config.docx_converter.clone(),
            docx_timeout: Duration::from_secs(120),
            pdfium_library: config.pdfium_library.clone(),
            google_export_base: crate::pipeline::gdoc::EXPORT_BASE.to_string(),
            download_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }
}

// ── PDF ──────────────────────────────────────────────────────────────────────

/// Rasterise every page of a PDF, in order.
pub async fn render_pdf(
    path: &Path,
    options: &RenderOptions,
) -> Result<Vec<RenderedUnit>, ConversionError> {
    let owned = path.to_path_buf();
    let options = options.clone();
    tokio::task::spawn_blocking(move || render_pdf_blocking(&owned, &options))
        .await
        .map_err(|e| ConversionError::render(path, format!("render task panicked: {e}")))?
}

fn render_pdf_blocking(
    path: &Path,
    options: &RenderOptions,
) -> Result<Vec<RenderedUnit>, ConversionError> {
    let pdfium = bind_pdfium(options.pdfium_library.as_deref())
        .map_err(|detail| ConversionError::render(path, detail))?;

    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| ConversionError::render(path, format!("cannot open PDF: {e:?}")))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF loaded: {} ({} pages)", path.display(), total);

    let max = options.max_image_dimension as i32;
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(options.dpi as f32 / 72.0)
        .set_maximum_width(max)
        .set_maximum_height(max);

    let mut units = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ConversionError::render(path, format!("page {}: {e:?}", idx + 1))
        })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        units.push(RenderedUnit::Image {
            page: idx + 1,
            image,
        });
    }

    if units.is_empty() {
        return Err(ConversionError::render(path, "document has no pages"));
    }
    Ok(units)
}

/// Bind pdfium from an explicit library, the working directory, or the
/// system library path, in that order.
pub fn bind_pdfium(explicit: Option<&Path>) -> Result<Pdfium, String> {
    let bindings = match explicit {
        Some(lib) => Pdfium::bind_to_library(lib)
            .map_err(|e| format!("cannot load pdfium from '{}': {e}", lib.display()))?,
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| format!("pdfium library not available: {e}"))?,
    };
    Ok(Pdfium::new(bindings))
}

// ── DOCX ─────────────────────────────────────────────────────────────────────

/// Convert a Word document to PDF with the external converter, then
/// rasterise it.
pub async fn render_docx(
    path: &Path,
    options: &RenderOptions,
) -> Result<Vec<RenderedUnit>, ConversionError> {
    let workdir = tempfile::TempDir::new()
        .map_err(|e| ConversionError::render(path, format!("cannot create temp dir: {e}")))?;

    let pdf = docx_to_pdf(path, workdir.path(), options).await?;
    // `workdir` lives until rasterisation is done.
    render_pdf(&pdf, options).await
}

async fn docx_to_pdf(
    path: &Path,
    outdir: &Path,
    options: &RenderOptions,
) -> Result<PathBuf, ConversionError> {
    debug!(
        "Converting {} to PDF with '{}'",
        path.display(),
        options.docx_converter
    );

    let child = tokio::process::Command::new(&options.docx_converter)
        .arg("--headless")
        .arg("--convert-to")
        .arg("pdf")
        .arg("--outdir")
        .arg(outdir)
        .arg(path)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(options.docx_timeout, child).await {
        Err(_) => {
            return Err(ConversionError::render(
                path,
                format!(
                    "'{}' did not finish within {:?}",
                    options.docx_converter, options.docx_timeout
                ),
            ))
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConversionError::render(
                path,
                format!(
                    "DOCX converter '{}' not found. Install LibreOffice or set the converter command.",
                    options.docx_converter
                ),
            ))
        }
        Ok(Err(e)) => return Err(ConversionError::render(path, e)),
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ConversionError::render(
            path,
            format!("DOCX conversion failed ({}): {}", output.status, stderr.trim()),
        ));
    }

    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let pdf = outdir.join(format!("{stem}.pdf"));
    if !pdf.exists() {
        return Err(ConversionError::render(
            path,
            "DOCX converter reported success but produced no PDF",
        ));
    }
    Ok(pdf)
}

// ── Images ───────────────────────────────────────────────────────────────────

/// Decode an image file into a single RGB unit.
pub async fn render_image(path: &Path) -> Result<Vec<RenderedUnit>, ConversionError> {
    let owned = path.to_path_buf();
    let image = tokio::task::spawn_blocking(move || image::open(&owned))
        .await
        .map_err(|e| ConversionError::render(path, format!("decode task panicked: {e}")))?
        .map_err(|e| ConversionError::render(path, e))?;

    // Palette, alpha and 16-bit images all go to the model as RGB8.
    let image = DynamicImage::ImageRgb8(image.to_rgb8());
    debug!(
        "Decoded {} → {}x{} px",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(vec![RenderedUnit::Image { page: 1, image }])
}

// ── Text ─────────────────────────────────────────────────────────────────────

/// Read a text source; form feeds split pages.
pub async fn render_text(path: &Path) -> Result<Vec<RenderedUnit>, ConversionError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ConversionError::render(path, e))?;
    let text = String::from_utf8_lossy(&bytes);

    let units: Vec<RenderedUnit> = text
        .split('\u{000C}')
        .filter(|chunk| !chunk.trim().is_empty())
        .enumerate()
        .map(|(i, chunk)| RenderedUnit::Text {
            page: i + 1,
            text: chunk.to_string(),
        })
        .collect();

    if units.is_empty() {
        return Err(ConversionError::render(path, "file contains no text"));
    }
    Ok(units)
}
