//! Processor registry: extension → format handler.
//!
//! The supported set is small and fixed, so the registry is a closed enum
//! rather than a table of trait objects. Adding a format means adding a
//! variant, and every `match` below tells you what else needs updating.

use crate::error::ConversionError;
use crate::pipeline::encode::fit_within;
use crate::pipeline::gdoc;
use crate::pipeline::render::{self, RenderOptions, RenderedUnit};
use crate::source::SourceDocument;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Whether a processor hands the model pictures or text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    ImageBased,
    TextBased,
}

/// One format handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Processor {
    Pdf,
    Docx,
    Image,
    Text,
    GoogleDoc,
}

const PDF_EXTENSIONS: &[&str] = &["pdf"];
const DOCX_EXTENSIONS: &[&str] = &["docx", "doc"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "tif", "webp"];
const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "html", "htm", "csv"];
const GOOGLE_DOC_EXTENSIONS: &[&str] = &["gdoc", "gsheet", "gslides"];

impl Processor {
    pub fn all() -> [Processor; 5] {
        [
            Processor::Pdf,
            Processor::Docx,
            Processor::Image,
            Processor::Text,
            Processor::GoogleDoc,
        ]
    }

    /// Pick the processor for an extension (case-insensitive, dot optional).
    pub fn select(extension: &str) -> Option<Processor> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        Self::all()
            .into_iter()
            .find(|p| p.extensions().contains(&ext.as_str()))
    }

    /// [`select`](Self::select) for a source, as a per-file error.
    pub fn for_source(source: &SourceDocument) -> Result<Processor, ConversionError> {
        Self::for_path(&source.path, &source.extension)
    }

    pub(crate) fn for_path(path: &Path, extension: &str) -> Result<Processor, ConversionError> {
        Self::select(extension).ok_or_else(|| ConversionError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: extension.to_string(),
            supported: supported_extensions()
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Processor::Pdf => PDF_EXTENSIONS,
            Processor::Docx => DOCX_EXTENSIONS,
            Processor::Image => IMAGE_EXTENSIONS,
            Processor::Text => TEXT_EXTENSIONS,
            Processor::GoogleDoc => GOOGLE_DOC_EXTENSIONS,
        }
    }

    pub fn modality(self) -> Modality {
        match self {
            Processor::Text => Modality::TextBased,
            Processor::Pdf | Processor::Docx | Processor::Image | Processor::GoogleDoc => {
                Modality::ImageBased
            }
        }
    }

    /// Render `source` into ordered units.
    ///
    /// Image-based output is already downsampled to the configured maximum
    /// dimension, so the encoder only has to deal with the byte budget.
    pub async fn process(
        self,
        source: &SourceDocument,
        options: &RenderOptions,
    ) -> Result<Vec<RenderedUnit>, ConversionError> {
        let path = source.path.as_path();
        let units = match self {
            Processor::Pdf => render::render_pdf(path, options).await?,
            Processor::Docx => render::render_docx(path, options).await?,
            Processor::Image => render::render_image(path).await?,
            Processor::GoogleDoc => gdoc::render_google_doc(path, options).await?,
            Processor::Text => return render::render_text(path).await,
        };

        Ok(units
            .into_iter()
            .map(|unit| match unit {
                RenderedUnit::Image { page, image } => RenderedUnit::Image {
                    page,
                    image: fit_within(image, options.max_image_dimension),
                },
                text => text,
            })
            .collect())
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Processor::Pdf => "PDF",
            Processor::Docx => "Word",
            Processor::Image => "Image",
            Processor::Text => "Text",
            Processor::GoogleDoc => "Google Docs",
        };
        f.write_str(name)
    }
}

/// Every extension any processor accepts, lower-case, without dots.
pub fn supported_extensions() -> BTreeSet<&'static str> {
    Processor::all()
        .into_iter()
        .flat_map(|p| p.extensions().iter().copied())
        .collect()
}

pub fn is_supported(path: &Path) -> bool {
    Processor::select(&crate::source::extension_of(path)).is_some()
}

/// Select the processor for `source` and render it.
pub async fn render(
    source: &SourceDocument,
    options: &RenderOptions,
) -> Result<Vec<RenderedUnit>, ConversionError> {
    Processor::for_source(source)?.process(source, options).await
}
